//! Subdex Common - Shared types, traits and settings
//!
//! This crate provides the data model, error taxonomy and collaborator
//! traits used across the subdex workspace.

pub mod config;
pub mod error;
pub mod process;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{ProbeToolOptions, Settings, MAX_BATCH_RETRIES};
pub use error::{SubdexError, SubdexResult};
pub use process::{ToolBinary, ToolOutput};
pub use traits::{CacheStore, EnumerationSource, OrganizationResolver, Prober};
pub use types::{
    progress_percent, HostSet, JobPhase, JobState, JobStatus, ProbeRecord, ProbeStatus,
    ResultDocument, Target,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
