//! Inbound message idempotency.
//!
//! Records `(transport, message_id)` pairs in the shared store for 24 hours
//! so a webhook delivered twice (retries, `message` + `message.any`
//! duplicates) produces side effects at most once.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;
use crate::lead::Transport;

/// Default retention for seen message ids.
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(86_400);

/// Value stored under a processed-message key.
const MARKER: &str = "1";

/// Key-value backed idempotency store.
///
/// Availability is chosen over exactness: when the backing store is down,
/// `seen` reports "not seen" and `mark` logs a warning, so processing
/// proceeds and rare duplicates are tolerated instead of stalling intake.
pub struct IdempotencyStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl IdempotencyStore {
    /// Create a store with the given retention.
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(transport: Transport, message_id: &str) -> String {
        format!("processed:{}:{}", transport, message_id)
    }

    /// Whether this `(transport, message_id)` was already marked within the
    /// retention window.
    pub async fn seen(&self, transport: Transport, message_id: &str) -> bool {
        match self.kv.exists(&Self::key(transport, message_id)).await {
            Ok(seen) => seen,
            Err(e) => {
                tracing::warn!("dedup check failed for {} {}: {}", transport, message_id, e);
                false
            }
        }
    }

    /// Mark this `(transport, message_id)` as processed.
    pub async fn mark(&self, transport: Transport, message_id: &str) {
        if let Err(e) = self
            .kv
            .set_with_ttl(&Self::key(transport, message_id), MARKER, self.ttl)
            .await
        {
            tracing::warn!("dedup mark failed for {} {}: {}", transport, message_id, e);
        }
    }

    /// Withdraw a mark so the transport's redelivery is processed. Used
    /// when admission fails after the mark was already written.
    pub async fn unmark(&self, transport: Transport, message_id: &str) {
        if let Err(e) = self
            .kv
            .compare_and_delete(&Self::key(transport, message_id), MARKER)
            .await
        {
            tracing::warn!("dedup unmark failed for {} {}: {}", transport, message_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::kv::test_util::BrokenKv;

    fn store() -> IdempotencyStore {
        IdempotencyStore::new(Arc::new(MemoryKv::new()), DEFAULT_IDEMPOTENCY_TTL)
    }

    #[tokio::test]
    async fn test_mark_then_seen() {
        let dedup = store();
        assert!(!dedup.seen(Transport::Whatsapp, "m1").await);

        dedup.mark(Transport::Whatsapp, "m1").await;
        assert!(dedup.seen(Transport::Whatsapp, "m1").await);
    }

    #[tokio::test]
    async fn test_transports_are_namespaced() {
        let dedup = store();
        dedup.mark(Transport::Whatsapp, "m1").await;
        assert!(!dedup.seen(Transport::Telegram, "m1").await);
    }

    #[tokio::test]
    async fn test_unmark_withdraws_mark() {
        let dedup = store();
        dedup.mark(Transport::Whatsapp, "m1").await;
        assert!(dedup.seen(Transport::Whatsapp, "m1").await);

        dedup.unmark(Transport::Whatsapp, "m1").await;
        assert!(!dedup.seen(Transport::Whatsapp, "m1").await);
    }

    #[tokio::test]
    async fn test_degrades_to_not_seen_when_backend_down() {
        let dedup = IdempotencyStore::new(Arc::new(BrokenKv), DEFAULT_IDEMPOTENCY_TTL);
        // Both calls must not error; seen degrades to false.
        dedup.mark(Transport::Whatsapp, "m1").await;
        assert!(!dedup.seen(Transport::Whatsapp, "m1").await);
    }
}
