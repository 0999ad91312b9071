//! At-least-once delivery of normalized events to agent endpoints.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Attempts per delivery.
pub const DEFAULT_FORWARD_RETRIES: u32 = 3;
/// Per-attempt request timeout.
const FORWARD_TIMEOUT_SECS: u64 = 15;
/// First retry delay; doubles after every failed attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("No agent URL configured for payload")]
    NoRouteConfigured,
    #[error("Failed to reach agent: {0}")]
    AgentUnreachable(String),
    #[error("Agent returned a non-JSON success body: {0}")]
    InvalidAgentResponse(String),
}

enum AttemptError {
    Retryable(String),
    BadJson(String),
}

/// POSTs a JSON payload with bounded retries and doubling backoff. Transport
/// failures and non-2xx statuses are retried; a malformed success body is
/// terminal since the agent did accept the event.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    retries: u32,
    initial_backoff: Duration,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new(DEFAULT_FORWARD_RETRIES)
    }
}

impl Forwarder {
    pub fn new(retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            retries: retries.max(1),
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_backoff(retries: u32, initial_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            ..Self::new(retries)
        }
    }

    /// Deliver `payload` to `agent_url`. `None` means no route exists for the
    /// event's flow, which is terminal. The idempotency key rides along as
    /// `X-Idempotency-Key` so agents can dedup redeliveries themselves.
    pub async fn forward(
        &self,
        agent_url: Option<&str>,
        payload: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value, ForwardError> {
        let Some(agent_url) = agent_url else {
            return Err(ForwardError::NoRouteConfigured);
        };

        let mut delay = self.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.retries {
            match self.post_once(agent_url, payload, idempotency_key).await {
                Ok(body) => return Ok(body),
                Err(AttemptError::BadJson(err)) => {
                    return Err(ForwardError::InvalidAgentResponse(err));
                }
                Err(AttemptError::Retryable(err)) => {
                    tracing::warn!("Agent forward failed ({attempt}/{}): {err}", self.retries);
                    last_error = err;
                }
            }
            if attempt < self.retries {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(ForwardError::AgentUnreachable(last_error))
    }

    async fn post_once(
        &self,
        agent_url: &str,
        payload: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value, AttemptError> {
        let mut request = self
            .client
            .post(agent_url)
            .timeout(Duration::from_secs(FORWARD_TIMEOUT_SECS))
            .json(payload);
        if let Some(key) = idempotency_key {
            request = request.header("X-Idempotency-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AttemptError::Retryable(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| AttemptError::Retryable(err.to_string()))?;

        if !status.is_success() {
            return Err(AttemptError::Retryable(format!(
                "agent responded {status}: {}",
                text.trim()
            )));
        }
        if text.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&text).map_err(|err| AttemptError::BadJson(err.to_string()))
    }
}
