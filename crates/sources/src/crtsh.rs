//! Certificate-transparency log source (crt.sh JSON API)

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, instrument};

use subdex_common::{EnumerationSource, OrganizationResolver, SubdexError, SubdexResult};
use subdex_target_resolver::normalize;

const SOURCE_NAME: &str = "crtsh";

/// One certificate row. Both fields are optional and may hold several
/// newline-separated names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CertEntry {
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub name_value: Option<String>,
}

/// Read-only lookup against a crt.sh-compatible endpoint.
pub struct CertLogSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CertLogSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SubdexResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("subdex/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SubdexError::source_failure(SOURCE_NAME, e))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }

    async fn query(&self, q: &str) -> Result<Vec<CertEntry>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", q), ("output", "json")])
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("returned status {}", status);
        }

        let body = response.text().await.context("reading body")?;
        // crt.sh answers an empty body when nothing matched
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&body).context("decoding JSON")
    }
}

#[async_trait]
impl EnumerationSource for CertLogSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self))]
    async fn discover(&self, domain: &str) -> SubdexResult<Vec<String>> {
        let entries = self
            .query(&format!("%.{domain}"))
            .await
            .map_err(|e| SubdexError::source_failure(SOURCE_NAME, format!("{e:#}")))?;
        let names = names_from_entries(&entries);
        debug!("{} certificate rows -> {} names", entries.len(), names.len());
        Ok(names)
    }
}

#[async_trait]
impl OrganizationResolver for CertLogSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self))]
    async fn root_domains(&self, organization: &str) -> SubdexResult<Vec<String>> {
        let entries = self
            .query(organization)
            .await
            .map_err(|e| SubdexError::source_failure(SOURCE_NAME, format!("{e:#}")))?;
        Ok(org_domains_from_entries(&entries))
    }
}

/// Every name in `common_name` and `name_value`, wildcard prefix stripped,
/// e-mail addresses skipped.
pub fn names_from_entries(entries: &[CertEntry]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for entry in entries {
        for field in [&entry.common_name, &entry.name_value].into_iter().flatten() {
            names.extend(split_names(field).filter_map(clean_name));
        }
    }
    names.into_iter().collect()
}

/// Sorted, normalized, deduplicated `common_name`s. Invalid names are dropped.
pub fn org_domains_from_entries(entries: &[CertEntry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|e| e.common_name.as_deref())
        .filter_map(clean_name)
        .filter_map(|name| normalize(&name).ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// Real newlines and the escaped two-character form both occur in the wild.
fn split_names(value: &str) -> impl Iterator<Item = &str> {
    value.split('\n').flat_map(|line| line.split("\\n"))
}

fn clean_name(name: &str) -> Option<String> {
    let name = name.trim();
    let name = name.strip_prefix("*.").unwrap_or(name);
    if name.is_empty() || name.contains('@') {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(json: &str) -> Vec<CertEntry> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn names_split_and_cleaned() {
        let rows = entries(
            r#"[
                {"common_name": "*.example.com", "name_value": "a.example.com\nb.example.com"},
                {"name_value": "c.example.com\\nadmin@example.com"},
                {"issuer_name": "C=US", "id": 7}
            ]"#,
        );
        assert_eq!(
            names_from_entries(&rows),
            vec!["a.example.com", "b.example.com", "c.example.com", "example.com"]
        );
    }

    #[test]
    fn org_domains_use_common_name_only() {
        let rows = entries(
            r#"[
                {"common_name": "Acme.com", "name_value": "ignored.example"},
                {"common_name": "*.acme.io"},
                {"common_name": "acme.com"},
                {"common_name": "security@acme.com"},
                {"common_name": "Acme Root CA"}
            ]"#,
        );
        assert_eq!(org_domains_from_entries(&rows), vec!["acme.com", "acme.io"]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_source_failure() {
        let source = CertLogSource::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let err = source.discover("example.com").await.unwrap_err();
        assert!(matches!(err, SubdexError::SourceFailure { .. }));
        assert!(!err.is_fatal());
    }
}
