//! Outbound Kapso platform client: send WhatsApp texts, fetch conversations.

use crate::config::Config;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const KAPSO_TIMEOUT_SECS: u64 = 15;

/// Upstream failures keep the Kapso status and body so callers can mirror
/// them to their own clients.
#[derive(Debug, Error)]
pub enum KapsoApiError {
    #[error("Kapso API base URL not configured")]
    MissingBaseUrl,
    #[error("{body}")]
    Status { status: StatusCode, body: String },
    #[error("{0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct KapsoClient {
    client: reqwest::Client,
    api_key: String,
    base_url: Option<String>,
    whatsapp_base_url: Option<String>,
}

impl KapsoClient {
    /// Built only when `KAPSO_API_KEY` is set. Either base URL may still be
    /// absent; the call that needs it fails instead of the whole client.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config.kapso_api_key.clone()?;
        let trim = |url: &String| url.trim_end_matches('/').to_string();
        Some(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config.kapso_base_url.as_ref().map(trim),
            whatsapp_base_url: config.kapso_whatsapp_base_url.as_ref().map(trim),
        })
    }

    /// Send a WhatsApp text through Kapso's Cloud API facade.
    pub async fn send_text(
        &self,
        phone_number_id: &str,
        to: &str,
        body: &str,
    ) -> Result<Value, KapsoApiError> {
        let base = self
            .whatsapp_base_url
            .as_deref()
            .ok_or(KapsoApiError::MissingBaseUrl)?;
        let url = format!("{base}/v21.0/{phone_number_id}/messages");
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": {"body": body},
        });

        let result = self.request(self.client.post(&url).json(&payload)).await;
        if result.is_ok() {
            tracing::info!("kapso message sent phone_number_id={phone_number_id} to={to}");
        }
        result
    }

    /// Fetch a conversation record.
    pub async fn fetch_conversation(&self, conversation_id: &str) -> Result<Value, KapsoApiError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or(KapsoApiError::MissingBaseUrl)?;
        let url = format!("{base}/conversations/{conversation_id}");

        let result = self.request(self.client.get(&url)).await;
        if result.is_ok() {
            tracing::info!("kapso conversation fetched conversation_id={conversation_id}");
        }
        result
    }

    async fn request(&self, request: reqwest::RequestBuilder) -> Result<Value, KapsoApiError> {
        let response = request
            .timeout(Duration::from_secs(KAPSO_TIMEOUT_SECS))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|err| KapsoApiError::Transport(err.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(KapsoApiError::Status {
                status,
                body: text.trim().to_string(),
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "raw": text })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_with(base_url: Option<&str>, whatsapp_base_url: Option<&str>) -> KapsoClient {
        let config = Config {
            kapso_api_key: Some("kapso-key".to_string()),
            kapso_base_url: base_url.map(ToOwned::to_owned),
            kapso_whatsapp_base_url: whatsapp_base_url.map(ToOwned::to_owned),
            ..Config::default()
        };
        KapsoClient::from_config(&config).unwrap()
    }

    #[test]
    fn missing_api_key_means_no_client() {
        assert!(KapsoClient::from_config(&Config::default()).is_none());
    }

    #[tokio::test]
    async fn send_text_posts_the_cloud_api_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/pn-123/messages"))
            .and(header("X-API-Key", "kapso-key"))
            .and(body_json(json!({
                "messaging_product": "whatsapp",
                "to": "+15555550123",
                "type": "text",
                "text": {"body": "hola"},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(None, Some(&format!("{}/", server.uri())));
        let sent = client
            .send_text("pn-123", "+15555550123", "hola")
            .await
            .unwrap();
        assert_eq!(sent, json!({"id": "msg-1"}));
    }

    #[tokio::test]
    async fn fetch_conversation_hits_the_conversations_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations/conv-9"))
            .and(header("X-API-Key", "kapso-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "conv-9"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(Some(&server.uri()), None);
        let conversation = client.fetch_conversation("conv-9").await.unwrap();
        assert_eq!(conversation["id"], "conv-9");
    }

    #[tokio::test]
    async fn upstream_errors_keep_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("conversation not found"))
            .mount(&server)
            .await;

        let client = client_with(Some(&server.uri()), None);
        let err = client.fetch_conversation("conv-9").await.unwrap_err();
        match err {
            KapsoApiError::Status { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "conversation not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_base_urls_fail_per_call() {
        let client = client_with(None, None);
        assert!(matches!(
            client.send_text("pn", "+1", "hi").await,
            Err(KapsoApiError::MissingBaseUrl)
        ));
        assert!(matches!(
            client.fetch_conversation("conv").await,
            Err(KapsoApiError::MissingBaseUrl)
        ));
    }
}
