//! Process-local cache store

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use subdex_common::{CacheStore, SubdexResult};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory store with per-entry expiry. Expired entries read as absent and
/// are evicted on access.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> SubdexResult<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> SubdexResult<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SubdexResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> SubdexResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        store.set("domain:a.com", "v1".into(), Duration::from_secs(60)).await.unwrap();
        store.set("domain:a.com", "v2".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("domain:a.com").await.unwrap().as_deref(), Some("v2"));

        store.delete("domain:a.com").await.unwrap();
        assert_eq!(store.get("domain:a.com").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let store = MemoryStore::new();
        store.set("k", "v".into(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }
}
