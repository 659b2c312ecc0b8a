//! Probe batcher - splits a host set into batches and runs them on a bounded
//! worker pool
//!
//! Workers only produce `BatchReport`s; they never touch the result document.
//! Whoever consumes the `ProbeRun` applies the reports one at a time.

use futures::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use subdex_common::{ProbeRecord, Prober, Settings, MAX_BATCH_RETRIES};

use crate::progress::ProgressTracker;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    TimedOut,
    Failed,
}

impl BatchOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BatchOutcome::Completed => "completed",
            BatchOutcome::TimedOut => "timed_out",
            BatchOutcome::Failed => "failed",
        }
    }
}

/// What one batch produced. Timed-out and failed batches carry no records
/// but still count toward progress.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub index: usize,
    pub hosts: Vec<String>,
    pub records: Vec<ProbeRecord>,
    pub outcome: BatchOutcome,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub batch_timeout: Duration,
    pub retries: u32,
    /// Batch launches per second.
    pub rate: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for BatchConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size,
            concurrency: settings.probe_concurrency,
            batch_timeout: settings.batch_timeout,
            retries: settings.batch_retries,
            rate: settings.batch_rate,
        }
    }
}

pub struct ProbeBatcher {
    prober: Arc<dyn Prober>,
    config: BatchConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl ProbeBatcher {
    pub fn new(prober: Arc<dyn Prober>, config: BatchConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate));
        Self {
            prober,
            config: BatchConfig {
                batch_size: config.batch_size.max(1),
                concurrency: config.concurrency.max(1),
                retries: config.retries.min(MAX_BATCH_RETRIES),
                ..config
            },
            rate_limiter,
        }
    }

    pub fn prober(&self) -> &Arc<dyn Prober> {
        &self.prober
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Longest a live run can go without reporting a batch.
    pub fn stall_window(&self) -> Duration {
        self.config.batch_timeout * (self.config.retries + 1)
    }

    /// `ceil(hosts / batch_size)`
    pub fn batch_count(&self, hosts: usize) -> usize {
        hosts.div_ceil(self.config.batch_size)
    }

    /// Start probing `hosts`. Must be called inside a tokio runtime.
    ///
    /// Dropping the returned `ProbeRun` makes the workers stop after their
    /// current batch.
    pub fn run(&self, hosts: Vec<String>) -> ProbeRun {
        let batches: VecDeque<(usize, Vec<String>)> = hosts
            .chunks(self.config.batch_size)
            .map(<[String]>::to_vec)
            .enumerate()
            .collect();
        let total_batches = batches.len();
        let progress = Arc::new(ProgressTracker::new());
        progress.set_total(total_batches);

        let (tx, rx) = mpsc::channel(total_batches.max(1));
        let workers = self.config.concurrency.min(total_batches);
        info!(
            "Probing {} host(s) in {} batch(es) with {} worker(s)",
            hosts.len(),
            total_batches,
            workers
        );

        // shared queue: workers pop the next batch until it runs dry
        let queue = Arc::new(Mutex::new(batches));
        for _ in 0..workers {
            let queue = queue.clone();
            let tx = tx.clone();
            let prober = self.prober.clone();
            let rate_limiter = self.rate_limiter.clone();
            let progress = progress.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, hosts)) = next else {
                        break;
                    };

                    rate_limiter.acquire().await;
                    let report = probe_batch(prober.as_ref(), &config, index, hosts).await;
                    progress.record(report.outcome, report.records.len());
                    if tx.send(report).await.is_err() {
                        debug!("Probe run dropped; worker exiting");
                        break;
                    }
                }
            });
        }

        ProbeRun {
            total_batches,
            rx,
            progress,
        }
    }
}

async fn probe_batch(
    prober: &dyn Prober,
    config: &BatchConfig,
    index: usize,
    hosts: Vec<String>,
) -> BatchReport {
    let mut attempts = 0;
    let mut last = (BatchOutcome::Failed, None);

    while attempts <= config.retries {
        attempts += 1;
        match timeout(config.batch_timeout, prober.probe(&hosts)).await {
            Ok(Ok(records)) => {
                debug!("Batch {} returned {} record(s)", index, records.len());
                return BatchReport {
                    index,
                    hosts,
                    records,
                    outcome: BatchOutcome::Completed,
                    attempts,
                    error: None,
                };
            }
            Ok(Err(e)) => {
                warn!("Batch {} attempt {} failed: {}", index, attempts, e);
                last = (BatchOutcome::Failed, Some(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "Batch {} attempt {} timed out after {:?}",
                    index, attempts, config.batch_timeout
                );
                last = (
                    BatchOutcome::TimedOut,
                    Some(format!("timed out after {:?}", config.batch_timeout)),
                );
            }
        }
    }

    let (outcome, error) = last;
    BatchReport {
        index,
        hosts,
        records: Vec::new(),
        outcome,
        attempts,
        error,
    }
}

/// Handle on a running probe. Reports arrive in completion order.
pub struct ProbeRun {
    total_batches: usize,
    rx: mpsc::Receiver<BatchReport>,
    progress: Arc<ProgressTracker>,
}

impl ProbeRun {
    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Next finished batch; `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<BatchReport> {
        self.rx.recv().await
    }

    /// Flatten the run into the records it yields.
    ///
    /// Consumes the reports directly, so nothing is written to the result
    /// cache; callers that need a stored document use [`ProbeRun::next`].
    pub fn into_record_stream(self) -> impl Stream<Item = ProbeRecord> {
        ReceiverStream::new(self.rx).flat_map(|report| futures::stream::iter(report.records))
    }
}
