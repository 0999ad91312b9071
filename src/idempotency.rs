//! Best-effort idempotency tracking for webhook deliveries.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Dedup store for webhook deliveries. The caller's check and the later mark
/// are separate calls, so two concurrent requests with the same key may both
/// pass the check; delivery stays at-least-once. Implementations can be
/// swapped (Redis, Firestore) without touching callers.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// True when the key was marked and its TTL has not elapsed. Expired
    /// entries are dropped on lookup.
    async fn was_processed(&self, key: &str) -> bool;

    /// Record the key for `ttl`. Only called after a successful forward, so
    /// a failed delivery leaves the sender's retry reprocessable.
    async fn mark_processed(&self, key: &str, ttl: Duration);

    async fn clear(&self);
}

/// In-process store. A restart or a second replica starts blank, which the
/// at-least-once contract allows.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn was_processed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    async fn mark_processed(&self, key: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, expires_at| *expires_at > now);
        entries.insert(key.to_owned(), now + ttl);
    }

    async fn clear(&self) {
        self.entries.lock().clear();
    }
}
