//! Prober - adapter for the external HTTP probing tool
//!
//! This module provides:
//! - the `Prober` implementation driving the tool over one batch
//! - parsing of the tool's JSON-lines output into `ProbeRecord`s

mod prober;
mod records;

pub use prober::HttpxProber;
pub use records::{parse_record, parse_records};
