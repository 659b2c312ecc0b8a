//! Target Resolver - host normalization and host set construction
//!
//! Every host string that reaches the cache key space or an external
//! process goes through [`normalize`]. Accepted input forms:
//! - bare host: "Example.COM"
//! - URL: "https://www.example.com:8443/path?q=1#frag"
//! - FQDN with trailing dot: "example.com."

use subdex_common::{HostSet, SubdexError, SubdexResult, Target};
use tracing::debug;

/// Longest host name DNS can carry.
const MAX_HOST_LEN: usize = 253;

/// Canonicalize a raw host string.
///
/// Strips scheme, credentials, port, path, query and fragment, keeps only
/// `[a-z0-9.-]` and lower-cases. The result never starts with `.`/`-`,
/// contains at least one dot and no empty labels, so normalizing it again is
/// a no-op.
pub fn normalize(raw: &str) -> SubdexResult<String> {
    let mut host = raw.trim();

    // a scheme only counts before the first path, query or fragment byte
    if let Some(at) = host.find("://") {
        if !host[..at].contains(&['/', '?', '#'][..]) {
            host = &host[at + 3..];
        }
    }
    if let Some(end) = host.find(&['/', '?', '#'][..]) {
        host = &host[..end];
    }
    if let Some((_, rest)) = host.rsplit_once('@') {
        host = rest;
    }
    if let Some((name, port)) = host.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            host = name;
        }
    }

    let mut cleaned: String = host
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if cleaned.ends_with('.') && !cleaned.ends_with("..") {
        cleaned.pop();
    }

    if cleaned.is_empty() {
        return Err(invalid(raw, "empty host"));
    }
    if cleaned.starts_with('.') || cleaned.starts_with('-') {
        return Err(invalid(raw, "leading '.' or '-'"));
    }
    if !cleaned.contains('.') {
        return Err(invalid(raw, "missing '.'"));
    }
    if cleaned.contains("..") || cleaned.ends_with('.') {
        return Err(invalid(raw, "empty label"));
    }
    if cleaned.len() > MAX_HOST_LEN {
        return Err(invalid(raw, "too long"));
    }

    Ok(cleaned)
}

/// Canonicalize an organization name: collapse whitespace, lower-case and
/// keep alphanumerics plus ` .-&,`.
pub fn normalize_organization(raw: &str) -> SubdexResult<String> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '.' | '-' | '&' | ','))
        .collect();
    let collapsed = kept
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if collapsed.is_empty() {
        return Err(SubdexError::InvalidHost(format!(
            "{raw:?}: empty organization name"
        )));
    }
    Ok(collapsed)
}

fn invalid(raw: &str, reason: &str) -> SubdexError {
    SubdexError::InvalidHost(format!("{raw:?}: {reason}"))
}

pub struct TargetResolver;

impl TargetResolver {
    pub fn new() -> Self { Self }

    /// Domain target from user input.
    pub fn domain(raw: &str) -> SubdexResult<Target> {
        normalize(raw).map(Target::Domain)
    }

    /// Organization target from user input.
    pub fn organization(raw: &str) -> SubdexResult<Target> {
        normalize_organization(raw).map(Target::Organization)
    }

    /// Merge raw host lists into one deduplicated set. Entries that fail
    /// normalization are dropped.
    pub fn host_set<I, S>(raw_hosts: I) -> HostSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HostSet::new();
        let mut rejected = 0usize;
        for raw in raw_hosts {
            match normalize(raw.as_ref()) {
                Ok(host) => {
                    set.insert(host);
                }
                Err(_) => rejected += 1,
            }
        }
        if rejected > 0 {
            debug!("Dropped {} invalid host(s) while merging", rejected);
        }
        set
    }
}

impl Default for TargetResolver { fn default() -> Self { Self::new() } }


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_url_parts() {
        assert_eq!(normalize("https://WWW.Example.com/path?q=1#x").unwrap(), "www.example.com");
        assert_eq!(normalize("http://user:pw@example.com:8443/").unwrap(), "example.com");
        assert_eq!(normalize("  Example.COM.  ").unwrap(), "example.com");
    }

    #[test]
    fn test_ignores_urls_in_path_or_query() {
        assert_eq!(normalize("example.com/login?next=https://evil.com").unwrap(), "example.com");
        assert_eq!(normalize("https://example.com/r?u=http://evil.com").unwrap(), "example.com");
        assert_eq!(normalize("example.com#https://evil.com").unwrap(), "example.com");
    }

    #[test]
    fn test_rejects_invalid() {
        for raw in ["", "not a domain", "a..b.com", ".example.com", "-example.com", "localhost", "...."] {
            let err = normalize(raw).unwrap_err();
            assert!(matches!(err, SubdexError::InvalidHost(_)), "{raw:?} -> {err}");
        }
    }

    #[test]
    fn test_strips_shell_metacharacters() {
        assert_eq!(normalize("example.com;rm -rf").unwrap(), "example.comrm-rf");
        assert_eq!(normalize("$(id).example.com").unwrap(), "id.example.com");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "Example.com",
            "https://a.b.example.co.uk:443/x",
            "xn--bcher-kva.example",
            "WWW.EXAMPLE.COM.",
            "foo_bar.example.com",
            "sub-domain.example.com",
        ];
        for raw in inputs {
            let once = normalize(raw).unwrap();
            assert_eq!(normalize(&once).unwrap(), once, "input {raw:?}");
        }
    }

    #[test]
    fn test_host_set_dedups_case_insensitively() {
        let set = TargetResolver::host_set(["www.Example.com", "www.example.com", "bad..host", ""]);
        assert_eq!(set.len(), 1);
        assert!(set.contains("www.example.com"));
    }

    #[test]
    fn test_targets() {
        assert_eq!(
            TargetResolver::domain("EXAMPLE.com").unwrap(),
            TargetResolver::domain("example.com").unwrap()
        );
        assert_eq!(
            TargetResolver::organization("  Acme   Corp, Inc. ").unwrap(),
            Target::Organization("acme corp, inc.".into())
        );
        assert!(TargetResolver::organization(" \t ").is_err());
        assert!(TargetResolver::organization("$;|").is_err());
    }
}
