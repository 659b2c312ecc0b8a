//! Telemetry - tracing setup and metric counters
//!
//! Counters go through the `metrics` facade and are no-ops until a recorder
//! is installed (see [`install_prometheus`]).

use anyhow::{Context, Result};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the verbosity count picks the
/// level. Calling this twice keeps the first subscriber.
pub fn init_tracing(verbose: u8, json: bool) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let installed = if json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).compact().try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Serve Prometheus metrics on `addr`. Must run inside a tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start metrics exporter on {addr}"))?;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

pub fn record_source_hosts(source: &str, hosts: usize) {
    counter!("subdex_source_hosts_total", "source" => source.to_string()).increment(hosts as u64);
}

pub fn record_source_failure(source: &str, kind: &'static str) {
    counter!("subdex_source_failures_total", "source" => source.to_string(), "kind" => kind)
        .increment(1);
}

/// `outcome` is one of completed / timed_out / failed.
pub fn record_batch(outcome: &'static str, records: usize) {
    counter!("subdex_probe_batches_total", "outcome" => outcome).increment(1);
    counter!("subdex_probe_records_total").increment(records as u64);
}

pub fn record_job(status: &'static str) {
    counter!("subdex_jobs_total", "status" => status).increment(1);
}

pub fn record_cache_hit() {
    counter!("subdex_cache_hits_total").increment(1);
}
