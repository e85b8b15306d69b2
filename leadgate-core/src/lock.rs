//! Per-user mutex over the shared key-value store.
//!
//! Serializes concurrent processing for one user across every worker
//! process. The lock is a TTL'd key holding a fencing token; release is a
//! guarded compare-and-delete, so a lock that expired and was reacquired by
//! another worker is never released by the original holder. A worker that
//! crashes while holding a lock loses it when the TTL lapses.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::kv::KvStore;

/// Default lock TTL, bounding the worst-case hold time.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Delay unit for linear backoff between acquisition attempts.
const RETRY_BACKOFF_UNIT: Duration = Duration::from_millis(100);

/// A held lock. Carries the fencing token needed to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    user_id: String,
    token: String,
}

impl LockToken {
    /// The user this lock covers.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The fencing token value.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Distributed per-user lock.
pub struct UserLock {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl UserLock {
    /// Create a lock manager with the given TTL.
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(user_id: &str) -> String {
        format!("lock:user:{}", user_id)
    }

    /// Try to acquire the lock for `user_id` once.
    ///
    /// Returns the token on success, `None` when the lock is held elsewhere.
    /// A backing-store failure degrades to a best-effort grant: processing
    /// must not stall on a KV outage, so the caller proceeds unlocked.
    pub async fn acquire(&self, user_id: &str) -> Option<LockToken> {
        // UUIDv4 has enough entropy that token reuse within a TTL is
        // practically impossible.
        let token = Uuid::new_v4().to_string();
        match self
            .kv
            .set_if_absent_with_ttl(&Self::key(user_id), &token, self.ttl)
            .await
        {
            Ok(true) => Some(LockToken {
                user_id: user_id.to_string(),
                token,
            }),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!("lock acquire degraded for {}: {}", user_id, e);
                Some(LockToken {
                    user_id: user_id.to_string(),
                    token,
                })
            }
        }
    }

    /// Acquire with up to `max_attempts` attempts and linearly growing
    /// backoff (100 ms x attempt number) between them.
    ///
    /// Returns `None` on exhaustion.
    pub async fn acquire_with_retry(&self, user_id: &str, max_attempts: u32) -> Option<LockToken> {
        for attempt in 1..=max_attempts {
            if let Some(token) = self.acquire(user_id).await {
                return Some(token);
            }
            if attempt < max_attempts {
                tokio::time::sleep(RETRY_BACKOFF_UNIT * attempt).await;
            }
        }
        tracing::warn!(
            "lock exhausted after {} attempts for {}",
            max_attempts,
            user_id
        );
        None
    }

    /// Release a held lock.
    ///
    /// Deletes the key only when it still holds this token. Returns whether
    /// the key was deleted; `false` means the lock already expired (and may
    /// have been reacquired elsewhere).
    pub async fn release(&self, token: &LockToken) -> bool {
        match self
            .kv
            .compare_and_delete(&Self::key(&token.user_id), &token.token)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                // TTL will reap the key.
                tracing::warn!("lock release failed for {}: {}", token.user_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::kv::test_util::BrokenKv;

    const USER: &str = "628123456789@s.whatsapp.net";

    fn lock_over(kv: Arc<dyn KvStore>) -> UserLock {
        UserLock::new(kv, DEFAULT_LOCK_TTL)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let lock = lock_over(Arc::new(MemoryKv::new()));

        let token = lock.acquire(USER).await.expect("first acquire");
        assert!(lock.acquire(USER).await.is_none(), "lock must be exclusive");

        assert!(lock.release(&token).await);
        assert!(lock.acquire(USER).await.is_some(), "released lock reusable");
    }

    #[tokio::test]
    async fn test_release_requires_matching_token() {
        let kv = Arc::new(MemoryKv::new());
        let lock = lock_over(kv.clone());

        let held = lock.acquire(USER).await.unwrap();
        let stale = LockToken {
            user_id: USER.to_string(),
            token: "stale-token".to_string(),
        };

        assert!(!lock.release(&stale).await, "stale token must not release");
        assert!(lock.acquire(USER).await.is_none(), "lock still held");
        assert!(lock.release(&held).await);
    }

    #[tokio::test]
    async fn test_expired_lock_reacquired_not_released_by_original_holder() {
        let kv = Arc::new(MemoryKv::new());
        let lock = UserLock::new(kv.clone(), Duration::from_millis(20));

        let original = lock.acquire(USER).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // TTL lapsed; a second worker takes the lock.
        let second = lock.acquire(USER).await.expect("reacquire after expiry");

        // The original holder's release must not free the second holder's lock.
        assert!(!lock.release(&original).await);
        assert!(lock.acquire(USER).await.is_none(), "second hold intact");
        assert!(lock.release(&second).await);
    }

    #[tokio::test]
    async fn test_locks_are_per_user() {
        let lock = lock_over(Arc::new(MemoryKv::new()));
        let _a = lock.acquire("user-a").await.expect("user-a");
        let _b = lock.acquire("user-b").await.expect("user-b independent");
    }

    #[tokio::test]
    async fn test_acquire_with_retry_exhausts() {
        let lock = lock_over(Arc::new(MemoryKv::new()));
        let _held = lock.acquire(USER).await.unwrap();

        let start = std::time::Instant::now();
        let result = lock.acquire_with_retry(USER, 3).await;
        assert!(result.is_none());
        // Two backoff sleeps: 100 ms + 200 ms.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_acquire_with_retry_succeeds_after_release() {
        let kv = Arc::new(MemoryKv::new());
        let lock = Arc::new(lock_over(kv));
        let held = lock.acquire(USER).await.unwrap();

        let contender = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire_with_retry(USER, 3).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        lock.release(&held).await;

        let token = contender.await.unwrap();
        assert!(token.is_some(), "retry should pick up the freed lock");
    }

    #[tokio::test]
    async fn test_degrades_to_best_effort_grant_when_backend_down() {
        let lock = lock_over(Arc::new(BrokenKv));
        let token = lock.acquire(USER).await;
        assert!(token.is_some(), "KV outage must not stall processing");
    }
}
