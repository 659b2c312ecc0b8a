//! Enumeration sources - passive certificate-log lookup, active enumeration
//! tool, and the aggregator that merges them

mod aggregator;
mod crtsh;
mod subfinder;

pub use aggregator::{Enumeration, SourceAggregator};
pub use crtsh::{names_from_entries, org_domains_from_entries, CertEntry, CertLogSource};
pub use subfinder::ToolSource;
