//! Axum-based HTTP gateway for Kapso webhook intake.
//!
//! Exposes three surfaces:
//! - `POST /webhooks/kapso`: verify, normalize, dedup, route, forward
//! - `GET /health`: liveness probe
//! - `/internal/*`: token-guarded outbound calls to the Kapso platform

use crate::config::Config;
use crate::error::ApiError;
use crate::forward::{Forwarder, DEFAULT_FORWARD_RETRIES};
use crate::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use crate::kapso::{KapsoApiError, KapsoClient};
use crate::normalize::KapsoWebhook;
use crate::parser::ParserClient;
use crate::routing;
use crate::signature::{constant_time_eq, verify_signature};
use crate::supabase::SupabaseStore;
use crate::transcript::build_transcript;
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (256KB). Kapso batches stay well under this.
pub const MAX_BODY_SIZE: usize = 262_144;
/// Request timeout. Sized to cover the slowest path: a parser call plus the
/// full agent retry budget.
pub const REQUEST_TIMEOUT_SECS: u64 = 90;

/// Headers copied onto normalized events: anything `x-`-prefixed plus this
/// allow-list, all lowercased.
const IMPORTANT_HEADERS: [&str; 6] = [
    "x-webhook-event",
    "x-webhook-signature",
    "x-idempotency-key",
    "x-webhook-payload-version",
    "x-webhook-batch",
    "x-webhook-timestamp",
];

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub forwarder: Forwarder,
    pub parser: Option<Arc<ParserClient>>,
    pub kapso: Option<Arc<KapsoClient>>,
    pub supabase: Option<Arc<SupabaseStore>>,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        let parser = config
            .parser_url
            .as_deref()
            .map(|url| Arc::new(ParserClient::new(url, config.parser_api_key.as_deref())));
        let kapso = KapsoClient::from_config(&config).map(Arc::new);
        let supabase = match (&config.supabase_url, &config.supabase_service_role_key) {
            (Some(url), Some(key)) => Some(Arc::new(SupabaseStore::new(url, key))),
            _ => None,
        };

        Self {
            config: Arc::new(config),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            forwarder: Forwarder::new(DEFAULT_FORWARD_RETRIES),
            parser,
            kapso,
            supabase,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/webhooks/kapso", post(handle_kapso_webhook))
        .route("/internal/send-message", post(handle_internal_send_message))
        .route(
            "/internal/conversations/{conversation_id}",
            get(handle_internal_get_conversation),
        )
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Bind and serve until ctrl-c.
pub async fn run(host: &str, port: u16, config: Config) -> Result<()> {
    let state = AppState::from_config(config);
    let app = router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        "kapso middleware listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install ctrl-c handler: {err}");
        std::future::pending::<()>().await;
    }
}

/// Lowercase and keep only the interesting subset of request headers.
fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut collected = HashMap::new();
    for (name, value) in headers {
        let name = name.as_str().to_lowercase();
        if !(name.starts_with("x-") || IMPORTANT_HEADERS.contains(&name.as_str())) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            collected.insert(name, value.to_string());
        }
    }
    collected
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health — always public.
async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// POST /webhooks/kapso
///
/// Runs the full pipeline: signature verification, payload normalization,
/// idempotency dedup, flow routing, and at-least-once agent forwarding. The
/// event is marked processed only after the agent accepted it, so a failed
/// forward leaves the key eligible for redelivery.
async fn handle_kapso_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if body.trim_ascii().is_empty() {
        return Err(ApiError::EmptyBody);
    }

    let headers = collect_headers(&headers);
    verify_signature(
        state.config.webhook_secret.as_deref(),
        header_value(&headers, "x-webhook-signature"),
        &body,
        header_value(&headers, "x-webhook-timestamp"),
        state.config.max_signature_skew_secs,
    )?;

    let payload = KapsoWebhook::parse(&body).map_err(|err| {
        tracing::warn!("failed to parse Kapso payload: {err}");
        ApiError::InvalidPayload(err.to_string())
    })?;

    if state.config.log_bodies {
        tracing::info!(
            "kapso headers={headers:?} payload={}",
            serde_json::to_string(&payload).unwrap_or_default()
        );
    }

    let mut event = payload.to_normalized(&headers);
    let preview = event
        .messages
        .first()
        .and_then(|message| message.body.as_deref());
    tracing::info!(
        "kapso event={} conversation={:?} phone={:?} owner={:?} contact={:?} preview={:?}",
        event.event_type,
        event.conversation_id,
        event.phone_number,
        event.owner_id,
        event.contact_id,
        preview,
    );

    let idempotency_key = event.idempotency_key.clone().filter(|key| !key.is_empty());
    if let Some(key) = idempotency_key.as_deref() {
        if state.idempotency.was_processed(key).await {
            tracing::info!("kapso idempotency hit: {key}");
            return Ok(Json(json!({"status": "already-processed"})));
        }
    }

    routing::annotate_flow_from_supabase(&mut event, state.supabase.as_deref()).await;
    let agent_url = routing::pick_agent_url(&event, &state.config.routes);

    let mut parser_response = Value::Null;
    if state.config.forward_to_parser {
        let transcript = build_transcript(&payload);
        if transcript.is_empty() {
            return Err(ApiError::EmptyTranscript);
        }
        let Some(parser) = state.parser.as_deref() else {
            return Err(ApiError::ParserUnreachable(
                "Parser URL not configured".to_string(),
            ));
        };
        parser_response = parser.send_transcript(&transcript).await.map_err(|err| {
            tracing::error!("parser call failed: {err:#}");
            ApiError::ParserUnreachable(format!("{err:#}"))
        })?;
    }

    let agent_payload = serde_json::to_value(&event).unwrap_or_default();
    let agent_response = state
        .forwarder
        .forward(agent_url, &agent_payload, idempotency_key.as_deref())
        .await?;

    if let Some(key) = idempotency_key.as_deref() {
        state
            .idempotency
            .mark_processed(key, state.config.idempotency_ttl)
            .await;
    }

    Ok(Json(json!({
        "status": "queued",
        "parser_response": parser_response,
        "agent_response": agent_response,
    })))
}

/// Guard for `/internal`: constant-time comparison of `X-Internal-Token`.
/// Leaving the token unset leaves the surface open for local deployments.
fn require_internal_token(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.internal_access_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get("x-internal-token")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !constant_time_eq(provided, expected) {
        return Err(ApiError::InvalidInternalToken);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    phone_number_id: String,
    to: String,
    body: String,
}

/// POST /internal/send-message — relay a WhatsApp text through Kapso.
async fn handle_internal_send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    require_internal_token(&state, &headers)?;
    let kapso = state.kapso.as_deref().ok_or(ApiError::KapsoNotConfigured)?;

    tracing::info!(
        "internal send-message phone_number_id={} to={}",
        req.phone_number_id,
        req.to
    );
    let sent = kapso
        .send_text(&req.phone_number_id, &req.to, &req.body)
        .await
        .map_err(into_api_error)?;
    Ok(Json(sent))
}

/// GET /internal/conversations/{conversation_id}
async fn handle_internal_get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(conversation_id): AxumPath<String>,
) -> Result<Json<Value>, ApiError> {
    require_internal_token(&state, &headers)?;
    let kapso = state.kapso.as_deref().ok_or(ApiError::KapsoNotConfigured)?;

    tracing::info!("internal get-conversation conversation_id={conversation_id}");
    let conversation = kapso
        .fetch_conversation(&conversation_id)
        .await
        .map_err(into_api_error)?;
    Ok(Json(conversation))
}

/// Kapso upstream statuses are mirrored back to internal callers.
fn into_api_error(err: KapsoApiError) -> ApiError {
    match err {
        KapsoApiError::MissingBaseUrl => ApiError::KapsoNotConfigured,
        KapsoApiError::Status { status, body } => ApiError::Upstream {
            status,
            detail: body,
        },
        KapsoApiError::Transport(message) => ApiError::BadGateway(message),
    }
}
