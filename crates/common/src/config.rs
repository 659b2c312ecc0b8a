//! Runtime settings
//!
//! Defaults match the hosted service this engine backs; every field can be
//! overridden from a `SUBDEX_*` environment variable and then from the CLI.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{SubdexError, SubdexResult};

/// Most extra attempts a probe batch gets.
pub const MAX_BATCH_RETRIES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub cache_ttl: Duration,
    pub cert_timeout: Duration,
    pub tool_timeout: Duration,
    pub batch_size: usize,
    pub probe_concurrency: usize,
    pub batch_timeout: Duration,
    pub batch_retries: u32,
    /// Batch launches per second across one probe run.
    pub batch_rate: u32,
    /// Cap on root domains an organization fans out to.
    pub org_domain_limit: usize,
    pub probe_tool: ProbeToolOptions,
    pub cert_log_url: String,
    pub enum_tool: String,
    pub probe_tool_name: String,
}

/// Flags handed to the external probing tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeToolOptions {
    pub host_timeout: Duration,
    pub rate_limit: u32,
    pub threads: u32,
    pub retries: u32,
}

impl Default for ProbeToolOptions {
    fn default() -> Self {
        Self {
            host_timeout: Duration::from_secs(10),
            rate_limit: 150,
            threads: 50,
            retries: 1,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            cert_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(120),
            batch_size: 100,
            probe_concurrency: 4,
            batch_timeout: Duration::from_secs(300),
            batch_retries: MAX_BATCH_RETRIES,
            batch_rate: 2,
            org_domain_limit: 10,
            probe_tool: ProbeToolOptions::default(),
            cert_log_url: "https://crt.sh/".to_string(),
            enum_tool: "subfinder".to_string(),
            probe_tool_name: "httpx".to_string(),
        }
    }
}

impl Settings {
    /// Defaults with `SUBDEX_*` overrides applied.
    pub fn from_env() -> SubdexResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> SubdexResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Self::default();

        if let Some(v) = parse_var::<u64, _>(&lookup, "SUBDEX_CACHE_TTL")? {
            s.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "SUBDEX_CERT_TIMEOUT")? {
            s.cert_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "SUBDEX_TOOL_TIMEOUT")? {
            s.tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "SUBDEX_BATCH_SIZE")? {
            s.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBDEX_PROBE_CONCURRENCY")? {
            s.probe_concurrency = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "SUBDEX_BATCH_TIMEOUT")? {
            s.batch_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "SUBDEX_BATCH_RETRIES")? {
            s.batch_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBDEX_BATCH_RATE")? {
            s.batch_rate = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBDEX_ORG_DOMAIN_LIMIT")? {
            s.org_domain_limit = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "SUBDEX_PROBE_HOST_TIMEOUT")? {
            s.probe_tool.host_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "SUBDEX_PROBE_RATE_LIMIT")? {
            s.probe_tool.rate_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBDEX_PROBE_THREADS")? {
            s.probe_tool.threads = v;
        }
        if let Some(v) = parse_var(&lookup, "SUBDEX_PROBE_TOOL_RETRIES")? {
            s.probe_tool.retries = v;
        }
        if let Some(v) = lookup("SUBDEX_CERT_LOG_URL") {
            s.cert_log_url = v;
        }
        if let Some(v) = lookup("SUBDEX_ENUM_TOOL") {
            s.enum_tool = v;
        }
        if let Some(v) = lookup("SUBDEX_PROBE_TOOL") {
            s.probe_tool_name = v;
        }

        s.validated()
    }

    /// Reject unusable values and clamp the batch retry count.
    pub fn validated(mut self) -> SubdexResult<Self> {
        if self.batch_size == 0 {
            return Err(SubdexError::Config("batch_size must be at least 1".into()));
        }
        if self.probe_concurrency == 0 {
            return Err(SubdexError::Config(
                "probe_concurrency must be at least 1".into(),
            ));
        }
        if self.batch_rate == 0 {
            return Err(SubdexError::Config("batch_rate must be at least 1".into()));
        }
        self.batch_retries = self.batch_retries.min(MAX_BATCH_RETRIES);
        Ok(self)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> SubdexResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SubdexError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let s = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.cache_ttl, Duration::from_secs(3600));
        assert_eq!(s.org_domain_limit, 10);
    }

    #[test]
    fn env_overrides_apply() {
        let s = Settings::from_lookup(lookup(&[
            ("SUBDEX_BATCH_SIZE", "50"),
            ("SUBDEX_CACHE_TTL", "60"),
            ("SUBDEX_PROBE_TOOL", "/opt/bin/httpx"),
        ]))
        .unwrap();
        assert_eq!(s.batch_size, 50);
        assert_eq!(s.cache_ttl, Duration::from_secs(60));
        assert_eq!(s.probe_tool_name, "/opt/bin/httpx");
    }

    #[test]
    fn bad_override_names_variable() {
        let err = Settings::from_lookup(lookup(&[("SUBDEX_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("SUBDEX_BATCH_SIZE"));
    }

    #[test]
    fn retries_are_clamped_and_zero_sizes_rejected() {
        let s = Settings::from_lookup(lookup(&[("SUBDEX_BATCH_RETRIES", "5")])).unwrap();
        assert_eq!(s.batch_retries, MAX_BATCH_RETRIES);
        assert!(Settings::from_lookup(lookup(&[("SUBDEX_BATCH_SIZE", "0")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("SUBDEX_PROBE_CONCURRENCY", "0")])).is_err());
    }
}
