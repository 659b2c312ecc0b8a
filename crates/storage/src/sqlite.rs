//! SQLite-backed cache store
//!
//! One row per key; writes are UPSERTs so the last writer wins.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use subdex_common::{CacheStore, SubdexError, SubdexResult};

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite://subdex.db`.
    pub async fn connect(url: &str) -> SubdexResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SubdexError::Config(format!("invalid cache url {url:?}: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(SubdexError::cache)?;
        let store = Self { pool };
        store.migrate().await?;
        let purged = store.purge_expired().await?;
        info!("Cache store opened at {} ({} expired entries purged)", url, purged);
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub async fn in_memory() -> SubdexResult<Self> {
        // every connection to :memory: is a separate database, so pin one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(SubdexError::cache)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> SubdexResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(SubdexError::cache)?;
        Ok(())
    }

    /// Delete every expired row and return how many went.
    pub async fn purge_expired(&self) -> SubdexResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await
            .map_err(SubdexError::cache)?;
        Ok(result.rows_affected())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl CacheStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> SubdexResult<Option<String>> {
        let row = sqlx::query("SELECT value, expires_at FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(SubdexError::cache)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at: i64 = row.try_get("expires_at").map_err(SubdexError::cache)?;
        if expires_at <= now_millis() {
            debug!("Evicting expired cache entry {}", key);
            self.delete(key).await?;
            return Ok(None);
        }
        let value: String = row.try_get("value").map_err(SubdexError::cache)?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> SubdexResult<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_ms);
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(SubdexError::cache)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> SubdexResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(SubdexError::cache)?;
        Ok(())
    }

    async fn ping(&self) -> SubdexResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(SubdexError::cache)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_last_write_wins() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set("org:acme", "first".into(), Duration::from_secs(60)).await.unwrap();
        store.set("org:acme", "second".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("org:acme").await.unwrap().as_deref(), Some("second"));
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn delete_and_expiry() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set("a", "1".into(), Duration::from_secs(60)).await.unwrap();
        store.set("b", "2".into(), Duration::ZERO).await.unwrap();

        assert_eq!(store.get("b").await.unwrap(), None);
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.set("live", "1".into(), Duration::from_secs(60)).await.unwrap();
        store.set("dead", "2".into(), Duration::ZERO).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_database_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("cache.db").display());
        {
            let store = SqliteStore::connect(&url).await.unwrap();
            store.set("domain:a.com", "doc".into(), Duration::from_secs(60)).await.unwrap();
            store.set("domain:old.com", "doc".into(), Duration::ZERO).await.unwrap();
        }
        let reopened = SqliteStore::connect(&url).await.unwrap();
        assert_eq!(reopened.get("domain:a.com").await.unwrap().as_deref(), Some("doc"));

        // expired rows are gone on open, before any read touches them
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&reopened.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
