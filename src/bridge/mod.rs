use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::AppResult;

pub mod memory;
pub mod redis;

pub use memory::InMemoryBus;
pub use redis::RedisBus;

/// A message received on a subscribed channel.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Handler invoked once per received message, on a dispatch task owned by
/// the bridge. Handlers log their own failures; nothing they do can
/// unsubscribe the channel.
pub type BusHandler = Arc<dyn Fn(BusMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Process-external bus used for cross-instance event propagation plus
/// shared key/value state.
///
/// The two capability groups (channels, storage) are deliberately kept
/// behind one collaborator so either backing can be swapped: an in-memory
/// map for single-instance deployments, Redis for multi-instance.
#[async_trait]
pub trait MessageBus: Send + Sync {
    // -- channels ------------------------------------------------------

    /// Serialize-and-send; at-least-once, asynchronous. Returns without
    /// blocking past a bounded timeout; while the bus is down publishes are
    /// best-effort and may be dropped.
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()>;

    /// Register a handler for every message matching `pattern` (`*` wildcard
    /// segments, Redis PSUBSCRIBE semantics). The subscription survives bus
    /// reconnects; one bad message never tears it down.
    async fn subscribe(&self, pattern: &str, handler: BusHandler) -> AppResult<()>;

    // -- key/value storage --------------------------------------------

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn del(&self, key: &str) -> AppResult<()>;

    // -- sets (shared online-users) ------------------------------------

    async fn set_add(&self, key: &str, member: &str) -> AppResult<()>;
    async fn set_remove(&self, key: &str, member: &str) -> AppResult<()>;
    async fn set_members(&self, key: &str) -> AppResult<Vec<String>>;

    // -- lists (per-user notification index) ---------------------------

    /// Push to the head of a list and refresh its TTL.
    async fn list_push(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>>;
}

/// Glob match with `*` wildcards, the subset of PSUBSCRIBE patterns this
/// service uses (`room:*`, `user:*:notifications`, literal channels).
pub(crate) fn pattern_matches(pattern: &str, channel: &str) -> bool {
    fn matches(p: &[u8], c: &[u8]) -> bool {
        match (p.first(), c.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], c) || (!c.is_empty() && matches(p, &c[1..]))
            }
            (Some(pc), Some(cc)) if pc == cc => matches(&p[1..], &c[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), channel.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::pattern_matches;

    #[test]
    fn literal_and_wildcard_patterns() {
        assert!(pattern_matches("broadcast:notifications", "broadcast:notifications"));
        assert!(pattern_matches("room:*", "room:3fa85f64-5717-4562-b3fc-2c963f66afa6"));
        assert!(pattern_matches("user:*:notifications", "user:42:notifications"));
        assert!(!pattern_matches("user:*:notifications", "user:42:presence"));
        assert!(!pattern_matches("room:*", "user:42:notifications"));
    }
}
