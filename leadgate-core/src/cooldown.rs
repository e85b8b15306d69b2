//! Post-reply cooldown.
//!
//! After the bot answers a user, further replies to that user are
//! suppressed for a short interval. Messages arriving during cooldown are
//! still persisted as interactions; only reply generation is skipped.

use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;

/// Default reply suppression window.
pub const DEFAULT_COOLDOWN_TTL: Duration = Duration::from_secs(2);

/// Key-value backed cooldown store.
pub struct CooldownStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl CooldownStore {
    /// Create a store with the given suppression window.
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(user_id: &str) -> String {
        format!("cooldown:user:{}", user_id)
    }

    /// Whether the user is inside the suppression window.
    ///
    /// A backing-store failure degrades to "not in cooldown" so intake
    /// never stalls; the worst case is an extra reply.
    pub async fn in_cooldown(&self, user_id: &str) -> bool {
        match self.kv.exists(&Self::key(user_id)).await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!("cooldown check failed for {}: {}", user_id, e);
                false
            }
        }
    }

    /// Start the suppression window for a user. Best effort.
    pub async fn set_cooldown(&self, user_id: &str) {
        if let Err(e) = self.kv.set_with_ttl(&Self::key(user_id), "1", self.ttl).await {
            tracing::warn!("cooldown set failed for {}: {}", user_id, e);
        }
    }
}
