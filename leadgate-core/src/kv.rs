//! Shared key-value store abstraction.
//!
//! Provides the [`KvStore`] trait as a port for the dedup, lock, cooldown,
//! and job-queue components, along with the Redis adapter used in
//! deployments and an in-process adapter for tests and single-node runs.
//!
//! Keeping this state in a shared external store (rather than process
//! memory) makes horizontal scaling of the handler a configuration change.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryKv;
pub use self::redis::RedisKv;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during key-value operations.
///
/// Callers in the admission path treat every variant as "backing store
/// unavailable" and degrade to permissive behavior.
#[derive(Debug, Error)]
pub enum KvError {
    /// The backend rejected or failed the operation.
    #[error("kv backend error: {0}")]
    Backend(String),
}

/// Port for the shared key-value store.
///
/// The contract matches what the admission-control components need:
/// atomic set-if-absent with expiry (locks, dedup), plain TTL'd sets
/// (cooldown), guarded delete (fenced lock release), and list operations
/// (job queues).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically set `key` to `value` iff the key is absent, with a TTL.
    ///
    /// Returns `true` when the key was set, `false` when it already existed.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the backend call fails.
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvError>;

    /// Get the value stored at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the backend call fails.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set `key` to `value` with a TTL, overwriting any prior value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the backend call fails.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Whether `key` currently holds a value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the backend call fails.
    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Delete `key` only if its current value equals `expected`.
    ///
    /// The comparison and deletion are atomic on the backend, so a lock
    /// that expired and was reacquired by another holder is never deleted
    /// by the original holder.
    ///
    /// Returns `true` when the key was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the backend call fails.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    /// Append `value` to the tail of the list at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the backend call fails.
    async fn list_push(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Read elements `start..=stop` of the list at `key` (negative indexes
    /// count from the tail, Redis LRANGE semantics).
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the backend call fails.
    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, KvError>;

    /// Remove the first occurrence of `value` from the list at `key`.
    ///
    /// Returns the number of removed elements (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the backend call fails.
    async fn list_delete(&self, key: &str, value: &str) -> Result<u32, KvError>;
}
