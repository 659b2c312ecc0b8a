//! Source aggregation
//!
//! Runs every registered source concurrently under its own deadline and
//! merges the results into one normalized `HostSet`. A source that fails or
//! times out contributes nothing; it never fails the aggregate.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use subdex_common::{
    EnumerationSource, HostSet, OrganizationResolver, SubdexError, SubdexResult, Target,
};
use subdex_target_resolver::TargetResolver;
use subdex_telemetry::{record_source_failure, record_source_hosts};

/// Root domains enumerated in parallel during organization fan-out.
const ORG_DOMAIN_PARALLELISM: usize = 4;

/// Merged output of one aggregation.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub hosts: HostSet,
    /// Root domains used for an organization (empty for a domain target).
    pub root_domains: Vec<String>,
    /// Root domains dropped by the fan-out cap.
    pub truncated: usize,
}

pub struct SourceAggregator {
    sources: Vec<Arc<dyn EnumerationSource>>,
    org_resolver: Option<Arc<dyn OrganizationResolver>>,
    org_domain_limit: usize,
}

impl SourceAggregator {
    pub fn new(org_domain_limit: usize) -> Self {
        Self {
            sources: Vec::new(),
            org_resolver: None,
            org_domain_limit,
        }
    }

    /// Register an enumeration source.
    pub fn add_source(&mut self, source: Arc<dyn EnumerationSource>) {
        self.sources.push(source);
    }

    pub fn with_org_resolver(mut self, resolver: Arc<dyn OrganizationResolver>) -> Self {
        self.org_resolver = Some(resolver);
        self
    }

    pub fn sources(&self) -> &[Arc<dyn EnumerationSource>] {
        &self.sources
    }

    /// Enumerate a domain or an organization.
    ///
    /// Errors only when the aggregator itself is unusable (nothing
    /// registered to answer this kind of target).
    pub async fn enumerate(&self, target: &Target) -> SubdexResult<Enumeration> {
        if self.sources.is_empty() {
            return Err(SubdexError::Config("no enumeration sources registered".into()));
        }
        match target {
            Target::Domain(domain) => Ok(Enumeration {
                hosts: self.enumerate_domain(domain).await,
                ..Enumeration::default()
            }),
            Target::Organization(org) => self.enumerate_organization(org).await,
        }
    }

    /// Run all sources for one domain and merge.
    #[instrument(skip(self))]
    pub async fn enumerate_domain(&self, domain: &str) -> HostSet {
        let runs = self
            .sources
            .iter()
            .map(|source| Self::run_source(source.as_ref(), domain));
        let outputs = futures::future::join_all(runs).await;

        let hosts = TargetResolver::host_set(outputs.into_iter().flatten());
        info!("Aggregated {} unique host(s) for {}", hosts.len(), domain);
        hosts
    }

    /// Resolve an organization to capped root domains and union their
    /// per-domain aggregations.
    #[instrument(skip(self))]
    async fn enumerate_organization(&self, org: &str) -> SubdexResult<Enumeration> {
        let resolver = self.org_resolver.as_ref().ok_or_else(|| {
            SubdexError::Config("no organization resolver registered".into())
        })?;

        let started = Instant::now();
        let mut roots = match timeout(resolver.timeout(), resolver.root_domains(org)).await {
            Ok(Ok(roots)) => roots,
            Ok(Err(e)) => {
                warn!("Organization lookup for '{}' failed: {}", org, e);
                record_source_failure(resolver.name(), e.kind());
                Vec::new()
            }
            Err(_) => {
                let e = SubdexError::source_timeout(resolver.name(), started.elapsed());
                warn!("Organization lookup for '{}': {}", org, e);
                record_source_failure(resolver.name(), e.kind());
                Vec::new()
            }
        };

        let mut truncated = 0;
        if roots.len() > self.org_domain_limit {
            truncated = roots.len() - self.org_domain_limit;
            warn!(
                "Organization '{}' resolved to {} root domains; keeping the first {} ({} dropped)",
                org,
                roots.len(),
                self.org_domain_limit,
                truncated
            );
            roots.truncate(self.org_domain_limit);
        }

        let per_domain: Vec<HostSet> = stream::iter(roots.iter())
            .map(|root| self.enumerate_domain(root))
            .buffer_unordered(ORG_DOMAIN_PARALLELISM)
            .collect()
            .await;

        let mut hosts = TargetResolver::host_set(roots.iter());
        for set in per_domain {
            hosts.extend_from(set);
        }

        Ok(Enumeration {
            hosts,
            root_domains: roots,
            truncated,
        })
    }

    async fn run_source(source: &dyn EnumerationSource, domain: &str) -> Vec<String> {
        let started = Instant::now();
        match timeout(source.timeout(), source.discover(domain)).await {
            Ok(Ok(hosts)) => {
                record_source_hosts(source.name(), hosts.len());
                hosts
            }
            Ok(Err(e)) => {
                warn!("Source {} failed for {}: {}", source.name(), domain, e);
                record_source_failure(source.name(), e.kind());
                Vec::new()
            }
            Err(_) => {
                let e = SubdexError::source_timeout(source.name(), started.elapsed());
                warn!("{} (domain {})", e, domain);
                record_source_failure(source.name(), e.kind());
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedSource {
        name: &'static str,
        hosts: Vec<&'static str>,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn ok(name: &'static str, hosts: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self { name, hosts, delay: Duration::ZERO, fail: false, calls: AtomicUsize::new(0) })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self { name, hosts: vec![], delay: Duration::ZERO, fail: true, calls: AtomicUsize::new(0) })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self { name, hosts: vec!["late.example.com"], delay, fail: false, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl EnumerationSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(100)
        }

        async fn discover(&self, domain: &str) -> SubdexResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(SubdexError::source_failure(self.name, "status 503"));
            }
            Ok(self.hosts.iter().map(|h| h.replace("{d}", domain)).collect())
        }
    }

    struct FixedOrg(Vec<String>);

    #[async_trait]
    impl OrganizationResolver for FixedOrg {
        fn name(&self) -> &str {
            "org"
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn root_domains(&self, _organization: &str) -> SubdexResult<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn merges_and_dedups_across_sources() {
        let mut agg = SourceAggregator::new(10);
        agg.add_source(FixedSource::ok("a", vec!["www.Example.com", "api.example.com"]));
        agg.add_source(FixedSource::ok("b", vec!["www.example.com", "not a host"]));

        let out = agg.enumerate(&Target::Domain("example.com".into())).await.unwrap();
        assert_eq!(out.hosts.to_vec(), vec!["api.example.com", "www.example.com"]);
    }

    #[tokio::test]
    async fn failed_source_contributes_nothing() {
        let mut agg = SourceAggregator::new(10);
        agg.add_source(FixedSource::failing("crtsh"));
        agg.add_source(FixedSource::ok("subfinder", vec!["a.example.com"]));

        let out = agg.enumerate(&Target::Domain("example.com".into())).await.unwrap();
        assert_eq!(out.hosts.to_vec(), vec!["a.example.com"]);
    }

    #[tokio::test]
    async fn timed_out_source_contributes_nothing() {
        let mut agg = SourceAggregator::new(10);
        agg.add_source(FixedSource::slow("slow", Duration::from_secs(5)));
        agg.add_source(FixedSource::ok("fast", vec!["a.example.com"]));

        let started = Instant::now();
        let out = agg.enumerate(&Target::Domain("example.com".into())).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(out.hosts.to_vec(), vec!["a.example.com"]);
    }

    #[tokio::test]
    async fn no_sources_is_an_error() {
        let agg = SourceAggregator::new(10);
        let err = agg.enumerate(&Target::Domain("example.com".into())).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn organization_fan_out_is_capped() {
        let roots: Vec<String> = (0..12).map(|i| format!("acme{i:02}.com")).collect();
        let source = FixedSource::ok("s", vec!["www.{d}"]);
        let mut agg = SourceAggregator::new(3).with_org_resolver(Arc::new(FixedOrg(roots)));
        agg.add_source(source.clone());

        let out = agg.enumerate(&Target::Organization("acme".into())).await.unwrap();
        assert_eq!(out.root_domains, vec!["acme00.com", "acme01.com", "acme02.com"]);
        assert_eq!(out.truncated, 9);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        // roots plus one subdomain each
        assert_eq!(out.hosts.len(), 6);
        assert!(out.hosts.contains("www.acme01.com"));
    }
}
