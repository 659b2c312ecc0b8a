//! Result cache - `ResultDocument`s serialized into a `CacheStore`

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use subdex_common::{CacheStore, ResultDocument, SubdexResult, Target};

/// Typed view over the key-value store. Every write replaces the whole
/// document and refreshes its TTL.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached document, if any. An entry that no longer parses reads as a miss.
    pub async fn get(&self, target: &Target) -> SubdexResult<Option<ResultDocument>> {
        let key = target.cache_key();
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    pub async fn put(&self, doc: &ResultDocument) -> SubdexResult<()> {
        let key = doc.target.cache_key();
        let raw = serde_json::to_string(doc)?;
        debug!("Writing {} ({} bytes)", key, raw.len());
        self.store.set(&key, raw, self.ttl).await
    }

    pub async fn delete(&self, target: &Target) -> SubdexResult<()> {
        self.store.delete(&target.cache_key()).await
    }

    /// Read-modify-write of one document. Returns `None` without writing when
    /// the document is gone.
    ///
    /// Not atomic across processes: a concurrent writer of the same key can be
    /// overwritten.
    pub async fn update<F>(&self, target: &Target, f: F) -> SubdexResult<Option<ResultDocument>>
    where
        F: FnOnce(&mut ResultDocument),
    {
        let Some(mut doc) = self.get(target).await? else {
            return Ok(None);
        };
        f(&mut doc);
        self.put(&doc).await?;
        Ok(Some(doc))
    }

    pub async fn ping(&self) -> SubdexResult<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subdex_common::{HostSet, ProbeStatus};
    use subdex_storage::MemoryStore;

    fn cache() -> (Arc<MemoryStore>, ResultCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = ResultCache::new(store.clone(), Duration::from_secs(60));
        (store, cache)
    }

    fn target() -> Target {
        Target::Domain("example.com".into())
    }

    #[tokio::test]
    async fn put_then_get() {
        let (_store, cache) = cache();
        let mut hosts = HostSet::new();
        hosts.insert("www.example.com");
        let doc = ResultDocument::new(target(), hosts);

        cache.put(&doc).await.unwrap();
        assert_eq!(cache.get(&target()).await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let (store, cache) = cache();
        store
            .set("domain:example.com", "{not json".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&target()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_skips_missing_document() {
        let (store, cache) = cache();
        let updated = cache.update(&target(), |d| d.fail("x")).await.unwrap();
        assert!(updated.is_none());
        assert!(store.is_empty());

        cache.put(&ResultDocument::new(target(), HostSet::new())).await.unwrap();
        let updated = cache.update(&target(), |d| d.fail("boom")).await.unwrap().unwrap();
        assert_eq!(updated.probe_status, ProbeStatus::Error);
        let stored = cache.get(&target()).await.unwrap().unwrap();
        assert_eq!(stored.probe_error.as_deref(), Some("boom"));
    }
}
