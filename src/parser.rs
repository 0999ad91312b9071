//! Client for the conversation parser service.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::time::Duration;

const PARSER_TIMEOUT_SECS: u64 = 30;

/// Posts flattened transcripts to the parser endpoint, with an optional
/// bearer key.
#[derive(Debug, Clone)]
pub struct ParserClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ParserClient {
    pub fn new(url: &str, api_key: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(ToOwned::to_owned),
        }
    }

    pub async fn send_transcript(&self, transcript: &str) -> Result<Value> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(PARSER_TIMEOUT_SECS))
            .json(&serde_json::json!({ "conversation": transcript }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("parser request failed")?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("parser request failed ({status}): {}", text.trim());
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "raw": text })))
    }
}
