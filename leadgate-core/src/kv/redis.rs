//! Redis adapter for the shared key-value store.
//!
//! Uses a multiplexed [`ConnectionManager`] so one client is shared by the
//! dedup, lock, cooldown, and queue components. Reconnection is handled by
//! the manager; individual command failures surface as [`KvError::Backend`]
//! and are degraded by the callers.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Script;
use redis::aio::ConnectionManager;

use super::{KvError, KvStore};

/// Atomic compare-and-delete, evaluated server-side.
const CAD_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed [`KvStore`].
pub struct RedisKv {
    manager: ConnectionManager,
    cad: Script,
}

impl RedisKv {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Backend`] if the client cannot be created or the
    /// initial connection fails.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(|e| KvError::Backend(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(Self {
            manager,
            cad: Script::new(CAD_SCRIPT),
        })
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        // EX takes whole seconds; sub-second TTLs get at least one second.
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        // SET key value NX EX ttl: replies OK when set, nil when present.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, Self::ttl_secs(ttl))
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        conn.exists(key)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        let deleted: i64 = self
            .cad
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(key, value)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        conn.lrange(key, start, stop)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn list_delete(&self, key: &str, value: &str) -> Result<u32, KvError> {
        let mut conn = self.manager.clone();
        let removed: u32 = conn
            .lrem(key, 1, value)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(removed)
    }
}
