//! Storage - cache store adapters
//!
//! Both adapters implement `subdex_common::CacheStore`. Any store error
//! surfaces as `CacheUnavailable`.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;
use subdex_common::{CacheStore, SubdexError, SubdexResult};

/// Open a store from a CLI-style location: `memory` or a `sqlite:` URL.
pub async fn open_store(location: &str) -> SubdexResult<Arc<dyn CacheStore>> {
    if location.eq_ignore_ascii_case("memory") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if location.starts_with("sqlite:") {
        return Ok(Arc::new(SqliteStore::connect(location).await?));
    }
    Err(SubdexError::Config(format!(
        "unsupported cache store {location:?} (expected 'memory' or 'sqlite://<path>')"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_memory_store() {
        let store = open_store("memory").await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn rejects_unknown_scheme() {
        assert!(open_store("redis://localhost").await.is_err());
    }
}
