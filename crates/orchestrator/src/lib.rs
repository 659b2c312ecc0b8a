//! Orchestrator - per-target job workflow, probe batching and the result cache

mod batcher;
mod cache;
mod orchestrator;
mod progress;
mod rate_limiter;
mod registry;

pub use batcher::{BatchConfig, BatchOutcome, BatchReport, ProbeBatcher, ProbeRun};
pub use cache::ResultCache;
pub use orchestrator::{Health, JobTicket, Orchestrator, Outcome, Status, PROBE_ABANDONED};
pub use progress::ProgressTracker;
pub use rate_limiter::RateLimiter;
pub use registry::{Admission, JobHandle, JobRegistry};
