//! In-process adapter for the shared key-value store.
//!
//! Backs the same [`KvStore`] contract with a mutex-guarded map. Expiry is
//! checked lazily on access. Suitable for tests and single-process
//! deployments where Redis is not available; per-user serialization then
//! only holds within one process.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{KvError, KvStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local [`KvStore`].
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current live value for `key`, dropping it first when expired.
    fn live_value(entries: &mut HashMap<String, Entry>, key: &str) -> Option<String> {
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        if Self::live_value(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        Ok(Self::live_value(&mut entries, key))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        Ok(Self::live_value(&mut entries, key).is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().expect("kv mutex poisoned");
        if Self::live_value(&mut entries, key).as_deref() == Some(expected) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut lists = self.lists.lock().expect("kv mutex poisoned");
        lists.entry(key.to_string()).or_default().push(value.to_string());
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, KvError> {
        let lists = self.lists.lock().expect("kv mutex poisoned");
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let clamp = |idx: isize| -> isize {
            if idx < 0 { (len + idx).max(0) } else { idx.min(len) }
        };
        let from = clamp(start);
        // LRANGE stop is inclusive.
        let to = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if from > to || len == 0 {
            return Ok(Vec::new());
        }
        Ok(list[from as usize..=(to as usize)].to_vec())
    }

    async fn list_delete(&self, key: &str, value: &str) -> Result<u32, KvError> {
        let mut lists = self.lists.lock().expect("kv mutex poisoned");
        if let Some(list) = lists.get_mut(key)
            && let Some(pos) = list.iter().position(|v| v == value)
        {
            list.remove(pos);
            return Ok(1);
        }
        Ok(0)
    }
}
