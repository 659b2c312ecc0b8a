//! Error types for subdex
//!
//! Failures inside a single source or a single probe batch are absorbed by
//! the caller; everything else terminates the current job.

use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubdexError {
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Source '{source_name}' timed out after {elapsed:?}")]
    SourceTimeout {
        source_name: String,
        elapsed: Duration,
    },

    #[error("Source '{source_name}' failed: {reason}")]
    SourceFailure { source_name: String, reason: String },

    #[error("Probe batch failure: {0}")]
    ProbeBatchFailure(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Unknown(String),
}

impl SubdexError {
    pub fn source_failure(source_name: impl Into<String>, reason: impl ToString) -> Self {
        SubdexError::SourceFailure {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn source_timeout(source_name: impl Into<String>, elapsed: Duration) -> Self {
        SubdexError::SourceTimeout {
            source_name: source_name.into(),
            elapsed,
        }
    }

    pub fn cache(reason: impl ToString) -> Self {
        SubdexError::CacheUnavailable(reason.to_string())
    }

    /// Whether this error ends the current job.
    ///
    /// Per-source and per-batch failures are absorbed where they happen.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SubdexError::SourceTimeout { .. }
                | SubdexError::SourceFailure { .. }
                | SubdexError::ProbeBatchFailure(_)
        )
    }

    /// Short machine-friendly label, used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            SubdexError::InvalidHost(_) => "invalid_host",
            SubdexError::SourceTimeout { .. } => "source_timeout",
            SubdexError::SourceFailure { .. } => "source_failure",
            SubdexError::ProbeBatchFailure(_) => "probe_batch_failure",
            SubdexError::CacheUnavailable(_) => "cache_unavailable",
            SubdexError::NotFound(_) => "not_found",
            SubdexError::Config(_) => "config",
            SubdexError::Io(_) => "io",
            SubdexError::Unknown(_) => "unknown",
        }
    }
}

impl From<serde_json::Error> for SubdexError {
    fn from(e: serde_json::Error) -> Self {
        SubdexError::Unknown(format!("serialization: {e}"))
    }
}

/// Result type alias for subdex operations
pub type SubdexResult<T> = Result<T, SubdexError>;
