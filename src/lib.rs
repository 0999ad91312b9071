//! Kapso webhook middleware.
//!
//! Sits between Kapso's WhatsApp webhook deliveries and downstream agent
//! services: verifies HMAC signatures, normalizes the two wire shapes into
//! one canonical event, deduplicates redeliveries, and forwards each event
//! to the agent owning its flow with bounded retries.

pub mod config;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod idempotency;
pub mod kapso;
pub mod normalize;
pub mod parser;
pub mod routing;
pub mod signature;
pub mod supabase;
pub mod transcript;
