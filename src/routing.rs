//! Flow routing: decide which agent endpoint receives a normalized event.

use crate::config::AgentRoutes;
use crate::normalize::NormalizedEvent;
use crate::supabase::SupabaseStore;
use serde_json::Value;

/// Lowercased routing hint. Metadata keys win over the `x-webhook-event`
/// header, which wins over the event type; the first non-empty candidate is
/// taken.
pub fn flow_hint(event: &NormalizedEvent) -> String {
    const METADATA_KEYS: [&str; 4] = ["flow", "kapso_flow", "campaign_flow", "kapso_type"];

    for key in METADATA_KEYS {
        if let Some(hint) = event.metadata.get(key).and_then(Value::as_str) {
            if !hint.is_empty() {
                return hint.to_lowercase();
            }
        }
    }
    if let Some(hint) = event.headers.get("x-webhook-event") {
        if !hint.is_empty() {
            return hint.to_lowercase();
        }
    }
    event.event_type.to_lowercase()
}

/// Substring match over the hint. Events that match nothing land on the
/// onboarding route.
pub fn pick_agent_url<'a>(event: &NormalizedEvent, routes: &'a AgentRoutes) -> Option<&'a str> {
    let hint = flow_hint(event);
    let route = if hint.contains("feedback") {
        &routes.feedback
    } else if hint.contains("setter") {
        &routes.setter
    } else if hint.contains("stage") || hint.contains("campaign") {
        &routes.campaign
    } else {
        &routes.onboarding
    };
    route.as_deref()
}

/// When the payload carries no routing info, an owner with a pending campaign
/// proposal is steered to the feedback flow. Lookup failures only log; the
/// event still ships with whatever routing it already had.
pub async fn annotate_flow_from_supabase(
    event: &mut NormalizedEvent,
    store: Option<&SupabaseStore>,
) {
    if event
        .metadata
        .get("flow")
        .and_then(Value::as_str)
        .is_some_and(|flow| !flow.is_empty())
    {
        return;
    }
    let Some(owner_id) = event.owner_id.clone() else {
        return;
    };
    let Some(store) = store else { return };

    match store.find_pending_campaign(&owner_id).await {
        Ok(Some(campaign)) => {
            tracing::info!("pending campaign for owner={owner_id}, routing to feedback flow");
            event
                .metadata
                .insert("flow".to_string(), Value::String("feedback".to_string()));
            event.metadata.insert(
                "campaign_proposal_id".to_string(),
                Value::String(campaign.id),
            );
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!("pending campaign lookup failed for owner={owner_id}: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn all_routes() -> AgentRoutes {
        AgentRoutes {
            onboarding: Some("http://agents.test/onboarding".to_string()),
            campaign: Some("http://agents.test/campaign".to_string()),
            feedback: Some("http://agents.test/feedback".to_string()),
            setter: Some("http://agents.test/setter".to_string()),
        }
    }

    fn event_with_metadata(pairs: &[(&str, &str)]) -> NormalizedEvent {
        let mut event = NormalizedEvent::default();
        for (key, value) in pairs {
            event
                .metadata
                .insert((*key).to_string(), json!(value));
        }
        event
    }

    #[test]
    fn metadata_flow_beats_every_other_hint() {
        let mut event = event_with_metadata(&[("flow", "Feedback"), ("kapso_type", "campaign")]);
        event
            .headers
            .insert("x-webhook-event".to_string(), "setter.assigned".to_string());
        event.event_type = "whatsapp.message.received".to_string();

        assert_eq!(flow_hint(&event), "feedback");
    }

    #[test]
    fn empty_candidates_are_skipped() {
        let mut event = event_with_metadata(&[("flow", ""), ("kapso_flow", "setter_flow")]);
        assert_eq!(flow_hint(&event), "setter_flow");

        event.metadata.clear();
        event
            .headers
            .insert("x-webhook-event".to_string(), "Conversation.Updated".to_string());
        assert_eq!(flow_hint(&event), "conversation.updated");

        event.headers.clear();
        event.event_type = "Fallback".to_string();
        assert_eq!(flow_hint(&event), "fallback");
    }

    #[test]
    fn hints_route_by_substring() {
        let routes = all_routes();
        let cases = [
            ("feedback:event", "http://agents.test/feedback"),
            ("setter_flow", "http://agents.test/setter"),
            ("stage:changed", "http://agents.test/campaign"),
            ("campaign_reply", "http://agents.test/campaign"),
            ("whatsapp.message.received", "http://agents.test/onboarding"),
        ];
        for (hint, expected) in cases {
            let event = event_with_metadata(&[("flow", hint)]);
            assert_eq!(pick_agent_url(&event, &routes), Some(expected), "hint={hint}");
        }

        let event = NormalizedEvent::default();
        assert_eq!(
            pick_agent_url(&event, &routes),
            Some("http://agents.test/onboarding")
        );
    }

    #[test]
    fn unconfigured_routes_yield_none() {
        let event = event_with_metadata(&[("flow", "feedback")]);
        assert_eq!(pick_agent_url(&event, &AgentRoutes::default()), None);
    }

    async fn store_returning(server: &MockServer, template: ResponseTemplate) -> SupabaseStore {
        Mock::given(method("GET"))
            .and(path("/rest/v1/campaign_proposals"))
            .respond_with(template)
            .mount(server)
            .await;
        SupabaseStore::new(&server.uri(), "service-key")
    }

    #[tokio::test]
    async fn pending_campaign_annotates_the_feedback_flow() {
        let server = MockServer::start().await;
        let store = store_returning(
            &server,
            ResponseTemplate::new(200).set_body_json(json!([{"id": "prop-1", "status": "pending"}])),
        )
        .await;

        let mut event = NormalizedEvent {
            owner_id: Some("owner-1".to_string()),
            ..NormalizedEvent::default()
        };
        annotate_flow_from_supabase(&mut event, Some(&store)).await;

        assert_eq!(event.metadata["flow"], "feedback");
        assert_eq!(event.metadata["campaign_proposal_id"], "prop-1");

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].url.query().unwrap().contains("user_id=eq.owner-1"));
    }

    #[tokio::test]
    async fn preset_flows_skip_the_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("user_id", "eq.owner-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;
        let store = SupabaseStore::new(&server.uri(), "service-key");

        let mut event = NormalizedEvent {
            owner_id: Some("owner-1".to_string()),
            ..NormalizedEvent::default()
        };
        event
            .metadata
            .insert("flow".to_string(), json!("onboarding"));
        annotate_flow_from_supabase(&mut event, Some(&store)).await;

        assert_eq!(event.metadata["flow"], "onboarding");
        assert!(!event.metadata.contains_key("campaign_proposal_id"));
    }

    #[tokio::test]
    async fn ownerless_events_skip_the_lookup() {
        let mut event = NormalizedEvent::default();
        // No store either; reaching for one would panic the test server setup.
        annotate_flow_from_supabase(&mut event, None).await;
        assert!(!event.metadata.contains_key("flow"));
    }

    #[tokio::test]
    async fn lookup_failures_leave_the_event_unrouted() {
        let server = MockServer::start().await;
        let store = store_returning(&server, ResponseTemplate::new(500)).await;

        let mut event = NormalizedEvent {
            owner_id: Some("owner-1".to_string()),
            ..NormalizedEvent::default()
        };
        annotate_flow_from_supabase(&mut event, Some(&store)).await;

        assert!(!event.metadata.contains_key("flow"));
        assert!(!event.metadata.contains_key("campaign_proposal_id"));
    }

    #[tokio::test]
    async fn no_pending_campaign_changes_nothing() {
        let server = MockServer::start().await;
        let store =
            store_returning(&server, ResponseTemplate::new(200).set_body_json(json!([]))).await;

        let mut event = NormalizedEvent {
            owner_id: Some("owner-1".to_string()),
            ..NormalizedEvent::default()
        };
        annotate_flow_from_supabase(&mut event, Some(&store)).await;

        assert!(!event.metadata.contains_key("flow"));
    }
}
