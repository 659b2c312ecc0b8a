//! Collaborator traits
//!
//! The enumeration tools, the certificate log, the probing tool and the
//! key-value store are all external; the engine only talks to them through
//! these seams.

use crate::error::SubdexResult;
use crate::types::ProbeRecord;
use async_trait::async_trait;
use std::time::Duration;

/// A source of candidate hostnames for a domain.
#[async_trait]
pub trait EnumerationSource: Send + Sync {
    /// Source name/identifier (used in logs and metrics)
    fn name(&self) -> &str;

    /// Deadline the aggregator enforces around `discover`.
    fn timeout(&self) -> Duration;

    /// Raw hostnames as reported by the source; the aggregator normalizes.
    async fn discover(&self, domain: &str) -> SubdexResult<Vec<String>>;

    /// Whether the backing tool or service is usable on this system
    fn is_available(&self) -> bool {
        true
    }
}

/// Maps an organization name to root domains registered to it.
#[async_trait]
pub trait OrganizationResolver: Send + Sync {
    fn name(&self) -> &str;

    fn timeout(&self) -> Duration;

    async fn root_domains(&self, organization: &str) -> SubdexResult<Vec<String>>;
}

/// Runs the external probing tool over one batch of hosts.
#[async_trait]
pub trait Prober: Send + Sync {
    fn name(&self) -> &str;

    /// Probe a batch. A tool that exits non-zero after printing some records
    /// still yields those records.
    ///
    /// Dropping the returned future must stop the underlying work; the batcher
    /// relies on that to enforce its deadline.
    async fn probe(&self, hosts: &[String]) -> SubdexResult<Vec<ProbeRecord>>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Key-value store with per-entry TTL and last-write-wins semantics.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> SubdexResult<Option<String>>;

    /// Replace the whole value under `key`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> SubdexResult<()>;

    async fn delete(&self, key: &str) -> SubdexResult<()>;

    /// Cheap reachability check
    async fn ping(&self) -> SubdexResult<()> {
        self.get("subdex:ping").await.map(|_| ())
    }
}
