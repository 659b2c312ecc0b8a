//! Core data types for the subdex recon engine
//!
//! `ResultDocument` is the unit of cache storage and carries the probe state
//! machine. Every mutation here happens on an owned copy which the caller then
//! writes back as a whole document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use uuid::Uuid;

/// Normalized domain or organization identifier.
///
/// Build values through `subdex_target_resolver` so the name is canonical;
/// the cache key and the job registry both rely on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Target {
    Domain(String),
    Organization(String),
}

impl Target {
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Target::Domain(name) | Target::Organization(name) => name,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_organization(&self) -> bool {
        matches!(self, Target::Organization(_))
    }

    /// Key under which the result document is cached.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self {
            Target::Domain(name) => format!("domain:{name}"),
            Target::Organization(name) => format!("org:{name}"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Domain(name) => f.write_str(name),
            Target::Organization(name) => write!(f, "org:{name}"),
        }
    }
}

/// Deduplicated set of discovered hostnames.
///
/// Membership is case-insensitive: everything is stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostSet(BTreeSet<String>);

impl HostSet {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already normalized host. Returns false for duplicates.
    pub fn insert(&mut self, host: impl AsRef<str>) -> bool {
        self.0.insert(host.as_ref().to_ascii_lowercase())
    }

    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        self.0.contains(&host.to_ascii_lowercase())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn extend_from(&mut self, other: HostSet) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl IntoIterator for HostSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One structured result per probed host.
///
/// Only `host` is relied upon (it joins back to the `HostSet`); the named
/// fields are what the probing tool usually reports and everything else is
/// kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub technologies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webserver: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProbeRecord {
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            url: None,
            status_code: None,
            title: None,
            content_length: None,
            technologies: Vec::new(),
            webserver: None,
            extra: serde_json::Map::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    NotStarted,
    Running,
    Completed,
    Error,
}

impl ProbeStatus {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::NotStarted => "not_started",
            ProbeStatus::Running => "running",
            ProbeStatus::Completed => "completed",
            ProbeStatus::Error => "error",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `round(completed * 100 / total)`; zero batches counts as done.
#[must_use]
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total);
    ((completed * 200 + total) / (total * 2)) as u8
}

/// Cached state for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub target: Target,
    pub hosts: HostSet,
    /// Root domains an organization resolved to (empty for domains).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub root_domains: Vec<String>,
    /// Root domains dropped by the organization fan-out cap.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub truncated_domains: usize,
    pub probe_status: ProbeStatus,
    pub progress: u8,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub probe_records: Vec<ProbeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl ResultDocument {
    #[must_use]
    pub fn new(target: Target, hosts: HostSet) -> Self {
        let now = Utc::now();
        Self {
            target,
            hosts,
            root_domains: Vec::new(),
            truncated_domains: 0,
            probe_status: ProbeStatus::NotStarted,
            progress: 0,
            total_batches: 0,
            completed_batches: 0,
            probe_records: Vec::new(),
            probe_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_root_domains(mut self, root_domains: Vec<String>, truncated: usize) -> Self {
        self.root_domains = root_domains;
        self.truncated_domains = truncated;
        self
    }

    /// Reset probe state and enter `running` for a run of `total_batches`.
    ///
    /// A run with no batches is already complete.
    pub fn begin_probe(&mut self, total_batches: usize) {
        self.probe_records.clear();
        self.probe_error = None;
        self.total_batches = total_batches;
        self.completed_batches = 0;
        self.progress = progress_percent(0, total_batches);
        self.probe_status = if total_batches == 0 {
            ProbeStatus::Completed
        } else {
            ProbeStatus::Running
        };
        self.touch();
    }

    /// Fold one finished batch into the document and return how many records
    /// were appended.
    ///
    /// Hosts outside the `HostSet` and hosts that already have a record are
    /// skipped.
    pub fn apply_batch(&mut self, records: Vec<ProbeRecord>) -> usize {
        let mut seen: HashSet<String> =
            self.probe_records.iter().map(|r| r.host.clone()).collect();
        let before = self.probe_records.len();
        for record in records {
            if self.hosts.contains(&record.host) && seen.insert(record.host.clone()) {
                self.probe_records.push(record);
            }
        }

        self.completed_batches = (self.completed_batches + 1).min(self.total_batches);
        self.progress = progress_percent(self.completed_batches, self.total_batches);
        if self.completed_batches >= self.total_batches {
            self.probe_status = ProbeStatus::Completed;
        }
        self.touch();
        self.probe_records.len() - before
    }

    pub fn fail(&mut self, cause: impl Into<String>) {
        self.probe_status = ProbeStatus::Error;
        self.probe_error = Some(cause.into());
        self.touch();
    }

    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    #[inline]
    #[must_use]
    pub fn is_probe_finished(&self) -> bool {
        matches!(self.probe_status, ProbeStatus::Completed | ProbeStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Error,
}

impl JobStatus {
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Where a target sits in the enumerate/probe workflow. `Idle` is the
/// absence of both a job and a cached document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Enumerating,
    ProbePending,
    Probing,
    Done,
    Error,
}

impl JobPhase {
    /// Phase implied by a cached document.
    #[must_use]
    pub fn of(doc: &ResultDocument) -> Self {
        match doc.probe_status {
            ProbeStatus::NotStarted => JobPhase::ProbePending,
            ProbeStatus::Running => JobPhase::Probing,
            ProbeStatus::Completed => JobPhase::Done,
            ProbeStatus::Error => JobPhase::Error,
        }
    }
}

/// Process-local record of an in-flight request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub id: Uuid,
    pub target: Target,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    #[must_use]
    pub fn new(target: Target) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            target,
            status: JobStatus::Running,
            phase: JobPhase::Enumerating,
            progress: 0,
            result: None,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(hosts: &[&str]) -> ResultDocument {
        let mut set = HostSet::new();
        for h in hosts {
            set.insert(h);
        }
        ResultDocument::new(Target::Domain("example.com".into()), set)
    }

    #[test]
    fn host_set_is_case_insensitive() {
        let mut set = HostSet::new();
        assert!(set.insert("www.Example.com"));
        assert!(!set.insert("www.example.com"));
        assert_eq!(set.len(), 1);
        assert!(set.contains("WWW.EXAMPLE.COM"));
    }

    #[test]
    fn cache_keys_by_kind() {
        assert_eq!(Target::Domain("a.com".into()).cache_key(), "domain:a.com");
        assert_eq!(Target::Organization("acme".into()).cache_key(), "org:acme");
    }

    #[test]
    fn progress_rounds_to_nearest() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[test]
    fn batches_drive_status_to_completed() {
        let mut doc = doc_with(&["a.example.com", "b.example.com"]);
        doc.begin_probe(2);
        assert_eq!(doc.probe_status, ProbeStatus::Running);

        let added = doc.apply_batch(vec![
            ProbeRecord::new("a.example.com").with_status(200),
            ProbeRecord::new("a.example.com").with_status(301),
            ProbeRecord::new("stray.other.org"),
        ]);
        assert_eq!(added, 1);
        assert_eq!(doc.progress, 50);
        assert_eq!(doc.probe_status, ProbeStatus::Running);

        // an empty batch still counts
        doc.apply_batch(Vec::new());
        assert_eq!(doc.progress, 100);
        assert_eq!(doc.probe_status, ProbeStatus::Completed);
        assert_eq!(doc.probe_records.len(), 1);
    }

    #[test]
    fn zero_batches_complete_immediately() {
        let mut doc = doc_with(&[]);
        doc.begin_probe(0);
        assert_eq!(doc.probe_status, ProbeStatus::Completed);
        assert_eq!(doc.progress, 100);
    }

    #[test]
    fn document_serializes_stably() {
        let doc = doc_with(&["b.example.com", "a.example.com"]);
        let first = serde_json::to_string(&doc).unwrap();
        let back: ResultDocument = serde_json::from_str(&first).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), first);
        assert!(first.contains("\"probe_status\":\"not_started\""));
    }
}
