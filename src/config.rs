//! Environment-driven configuration, read once at startup and injected into
//! components. Nothing re-reads the environment after boot.

use std::time::Duration;

/// Default idempotency window (one hour).
pub const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 3_600;
/// Default allowed clock drift between signer and verifier.
pub const DEFAULT_MAX_SIGNATURE_SKEW_SECS: i64 = 300;

/// Per-flow agent destinations. Any of them may be absent; an event routed
/// to a missing destination fails with a 502 at forward time.
#[derive(Debug, Clone, Default)]
pub struct AgentRoutes {
    pub onboarding: Option<String>,
    pub campaign: Option<String>,
    pub feedback: Option<String>,
    pub setter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret for `X-Webhook-Signature`. Unset disables verification.
    pub webhook_secret: Option<String>,
    pub max_signature_skew_secs: i64,
    pub routes: AgentRoutes,
    pub parser_url: Option<String>,
    pub parser_api_key: Option<String>,
    /// When set, every webhook also posts a transcript to the parser before
    /// the agent forward.
    pub forward_to_parser: bool,
    pub idempotency_ttl: Duration,
    /// Static token guarding the `/internal/*` routes. Unset leaves them open.
    pub internal_access_token: Option<String>,
    pub kapso_api_key: Option<String>,
    pub kapso_base_url: Option<String>,
    pub kapso_whatsapp_base_url: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,
    /// Log collected headers and the parsed payload for every webhook.
    pub log_bodies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            max_signature_skew_secs: DEFAULT_MAX_SIGNATURE_SKEW_SECS,
            routes: AgentRoutes::default(),
            parser_url: None,
            parser_api_key: None,
            forward_to_parser: false,
            idempotency_ttl: Duration::from_secs(DEFAULT_IDEMPOTENCY_TTL_SECS),
            internal_access_token: None,
            kapso_api_key: None,
            kapso_base_url: None,
            kapso_whatsapp_base_url: None,
            supabase_url: None,
            supabase_service_role_key: None,
            log_bodies: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            webhook_secret: env_string("KAPSO_WEBHOOK_SECRET"),
            max_signature_skew_secs: env_parse(
                "MAX_SIGNATURE_SKEW_SECONDS",
                DEFAULT_MAX_SIGNATURE_SKEW_SECS,
            ),
            routes: AgentRoutes {
                onboarding: env_string("AGENT_ONBOARDING_URL"),
                campaign: env_string("AGENT_CAMPAIGN_URL"),
                feedback: env_string("AGENT_FEEDBACK_URL"),
                setter: env_string("AGENT_SETTER_URL"),
            },
            parser_url: env_string("PARSER_URL"),
            parser_api_key: env_string("PARSER_API_KEY"),
            forward_to_parser: env_flag("FORWARD_TO_PARSER"),
            idempotency_ttl: Duration::from_secs(env_parse(
                "IDEMPOTENCY_TTL_SECONDS",
                DEFAULT_IDEMPOTENCY_TTL_SECS,
            )),
            internal_access_token: env_string("INTERNAL_ACCESS_TOKEN"),
            kapso_api_key: env_string("KAPSO_API_KEY"),
            kapso_base_url: env_string("KAPSO_BASE_URL"),
            kapso_whatsapp_base_url: env_string("KAPSO_WHATSAPP_BASE_URL"),
            supabase_url: env_string("SUPABASE_URL"),
            supabase_service_role_key: env_string("SUPABASE_SERVICE_ROLE_KEY"),
            log_bodies: env_flag("LOG_BODIES"),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(name: &str) -> bool {
    env_string(name).is_some_and(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
