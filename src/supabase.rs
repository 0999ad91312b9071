//! Pending-campaign lookups against the Supabase PostgREST API.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

const SUPABASE_TIMEOUT_SECS: u64 = 10;

/// Newest pending `campaign_proposals` row for an owner.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingCampaign {
    pub id: String,
    pub status: String,
}

/// Read-only PostgREST client authenticated with the service-role key.
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: &str, service_role_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }

    /// The most recently sent pending campaign proposal for `owner_id`, if
    /// one exists.
    pub async fn find_pending_campaign(&self, owner_id: &str) -> Result<Option<PendingCampaign>> {
        let url = format!("{}/rest/v1/campaign_proposals", self.base_url);
        let owner_filter = format!("eq.{owner_id}");
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(SUPABASE_TIMEOUT_SECS))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .query(&[
                ("select", "id,status"),
                ("user_id", owner_filter.as_str()),
                ("status", "eq.pending"),
                ("order", "sent_at.desc"),
                ("limit", "1"),
            ])
            .send()
            .await
            .context("campaign proposal lookup failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("campaign proposal lookup failed ({status}): {}", body.trim());
        }

        let rows: Vec<PendingCampaign> = response
            .json()
            .await
            .context("campaign proposal response was not valid JSON")?;
        Ok(rows.into_iter().next())
    }
}
