//! Orchestrator - per-target workflow and the operations exposed to callers
//!
//! `IDLE -> ENUMERATING -> PROBE_PENDING -> PROBING -> DONE`, or `ERROR` from
//! any state. The cached `ResultDocument` carries the durable part of that
//! state; the `JobRegistry` carries the in-flight part.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use subdex_common::{
    JobPhase, JobState, JobStatus, ProbeStatus, ResultDocument, SubdexError, SubdexResult, Target,
};
use subdex_sources::SourceAggregator;
use subdex_telemetry::{record_batch, record_cache_hit, record_job};

use crate::batcher::{ProbeBatcher, ProbeRun};
use crate::cache::ResultCache;
use crate::registry::{Admission, JobHandle, JobRegistry};

/// Error recorded on a `running` document whose prober went away.
pub const PROBE_ABANDONED: &str = "probe abandoned";

/// Answer to `enumerate_and_probe`.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Document available now (cache hit, or the enumeration this call ran).
    Ready(ResultDocument),
    /// Work is in flight; poll `get_status`.
    Job(JobTicket),
}

#[derive(Debug, Clone)]
pub struct JobTicket {
    /// True when this call attached to somebody else's job.
    pub joined: bool,
    pub state: JobState,
}

/// Answer to `get_status`.
#[derive(Debug, Clone)]
pub enum Status {
    Job(JobState),
    Document(ResultDocument),
    NotFound,
}

#[derive(Debug, Clone)]
pub struct Health {
    pub cache: Result<(), String>,
    /// Collaborator name and whether it is usable.
    pub tools: Vec<(String, bool)>,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.cache.is_ok() && self.tools.iter().all(|(_, ok)| *ok)
    }
}

pub struct Orchestrator {
    aggregator: Arc<SourceAggregator>,
    batcher: Arc<ProbeBatcher>,
    cache: ResultCache,
    registry: Arc<JobRegistry>,
}

impl Orchestrator {
    pub fn new(
        aggregator: Arc<SourceAggregator>,
        batcher: Arc<ProbeBatcher>,
        cache: ResultCache,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            aggregator,
            batcher,
            cache,
            registry,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// How long a running probe may go without writing before it is
    /// considered dead.
    pub fn stall_window(&self) -> Duration {
        self.batcher.stall_window()
    }

    /// Enumerate `target` and optionally start probing it.
    ///
    /// A usable cache hit is returned as is. Otherwise the first caller runs
    /// enumeration inline and gets the partial document back; concurrent
    /// callers for the same target get the running job instead.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn enumerate_and_probe(
        &self,
        target: &Target,
        use_cache: bool,
        run_probe: bool,
    ) -> SubdexResult<Outcome> {
        if let Some(state) = self.running_job(target) {
            record_job("joined");
            return Ok(Outcome::Job(JobTicket { joined: true, state }));
        }

        if use_cache {
            match self.cache.get(target).await? {
                // no job in this process owns it
                Some(doc) if doc.probe_status == ProbeStatus::Running => {
                    if run_probe {
                        warn!("Cached probe for {} has no job here; restarting it", target);
                        return self.trigger_probe(target).await.map(Outcome::Job);
                    }
                    record_cache_hit();
                    return Ok(Outcome::Ready(self.settle_orphan(doc).await?));
                }
                Some(doc) if doc.probe_status != ProbeStatus::Error => {
                    record_cache_hit();
                    if run_probe && doc.probe_status == ProbeStatus::NotStarted {
                        debug!("Cached hosts for {} were never probed; probing now", target);
                        return self.trigger_probe(target).await.map(Outcome::Job);
                    }
                    debug!("Cache hit for {}", target);
                    return Ok(Outcome::Ready(doc));
                }
                Some(_) => debug!("Cached document for {} is in error; refreshing", target),
                None => {}
            }
        }

        let handle = match self.admit(target) {
            Ok(handle) => handle,
            Err(state) => {
                record_job("joined");
                return Ok(Outcome::Job(JobTicket { joined: true, state }));
            }
        };
        record_job("started");

        handle.set_phase(JobPhase::Enumerating);
        let enumeration = match self.aggregator.enumerate(target).await {
            Ok(enumeration) => enumeration,
            Err(e) => {
                fail_job(handle, e.to_string());
                return Err(e);
            }
        };
        info!(
            "Enumerated {} host(s) for {}",
            enumeration.hosts.len(),
            target
        );

        let doc = ResultDocument::new(target.clone(), enumeration.hosts)
            .with_root_domains(enumeration.root_domains, enumeration.truncated);
        if let Err(e) = self.cache.put(&doc).await {
            fail_job(handle, e.to_string());
            return Err(e);
        }
        handle.set_phase(JobPhase::ProbePending);

        if run_probe {
            let (doc, _) = self.launch_probe(handle, doc).await?;
            return Ok(Outcome::Ready(doc));
        }

        // nothing left in flight; the caller already holds the result
        handle.release();
        record_job("completed");
        Ok(Outcome::Ready(doc))
    }

    /// Start (or restart) probing the cached hosts of `target`, without
    /// enumerating again.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn trigger_probe(&self, target: &Target) -> SubdexResult<JobTicket> {
        if let Some(state) = self.running_job(target) {
            return Ok(JobTicket { joined: true, state });
        }

        let Some(doc) = self.cache.get(target).await? else {
            return Err(SubdexError::NotFound(format!(
                "no enumeration result cached for {target}"
            )));
        };

        let handle = match self.admit(target) {
            Ok(handle) => handle,
            Err(state) => return Ok(JobTicket { joined: true, state }),
        };
        record_job("started");

        let (_, state) = self.launch_probe(handle, doc).await?;
        Ok(JobTicket {
            joined: false,
            state,
        })
    }

    /// In-flight or just-finished job first, then the cached document.
    ///
    /// A finished job is reported once; later calls fall through to the
    /// cache.
    pub async fn get_status(&self, target: &Target) -> SubdexResult<Status> {
        if let Some(state) = self.registry.observe(target) {
            return Ok(Status::Job(state));
        }
        Ok(match self.cache.get(target).await? {
            Some(doc) => Status::Document(self.settle_orphan(doc).await?),
            None => Status::NotFound,
        })
    }

    /// Drop the cached document. A running probe notices on its next write
    /// and ends in error.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn invalidate(&self, target: &Target) -> SubdexResult<()> {
        self.cache.delete(target).await?;
        if self.registry.forget_finished(target) {
            debug!("Forgot finished job for {}", target);
        }
        info!("Invalidated {}", target);
        Ok(())
    }

    pub async fn health(&self) -> Health {
        let cache = self.cache.ping().await.map_err(|e| e.to_string());
        if let Err(e) = &cache {
            warn!("Cache store {} unreachable: {}", self.cache.store_name(), e);
        }

        let mut tools: Vec<(String, bool)> = self
            .aggregator
            .sources()
            .iter()
            .map(|s| (s.name().to_string(), s.is_available()))
            .collect();
        let prober = self.batcher.prober();
        tools.push((prober.name().to_string(), prober.is_available()));

        Health { cache, tools }
    }

    // A `running` document with no job in this process that has not been
    // written for a whole stall window belongs to a probe that died.
    async fn settle_orphan(&self, doc: ResultDocument) -> SubdexResult<ResultDocument> {
        let idle = (Utc::now() - doc.updated_at).to_std().unwrap_or_default();
        if doc.probe_status != ProbeStatus::Running || idle <= self.batcher.stall_window() {
            return Ok(doc);
        }
        warn!(
            "Probe for {} made no progress for {:?}; marking it abandoned",
            doc.target, idle
        );
        let target = doc.target.clone();
        let settled = self
            .cache
            .update(&target, |d| {
                if d.probe_status == ProbeStatus::Running {
                    d.fail(PROBE_ABANDONED);
                }
            })
            .await?;
        Ok(settled.unwrap_or(doc))
    }

    fn running_job(&self, target: &Target) -> Option<JobState> {
        self.registry
            .snapshot(target)
            .filter(|s| s.status == JobStatus::Running)
    }

    // Own a new job, or get the running one. A finished job nobody observed
    // is superseded by this request.
    fn admit(&self, target: &Target) -> Result<JobHandle, JobState> {
        loop {
            match self.registry.start_or_join(target) {
                Admission::Started(handle) => return Ok(handle),
                Admission::Running(state) => return Err(state),
                Admission::Finished(state) => {
                    debug!("Superseding unobserved {} job {}", state.status, state.id)
                }
            }
        }
    }

    /// Reset the document to `running`, store it, and hand the run to a
    /// background driver. Returns the stored document and the job state.
    async fn launch_probe(
        &self,
        handle: JobHandle,
        mut doc: ResultDocument,
    ) -> SubdexResult<(ResultDocument, JobState)> {
        let hosts = doc.hosts.to_vec();
        let total = self.batcher.batch_count(hosts.len());
        doc.begin_probe(total);

        if let Err(e) = self.cache.put(&doc).await {
            fail_job(handle, e.to_string());
            return Err(e);
        }
        handle.set_phase(JobPhase::of(&doc));
        handle.set_progress(doc.progress);
        let state = handle
            .state()
            .unwrap_or_else(|| JobState::new(doc.target.clone()));

        if total == 0 {
            info!("No hosts to probe for {}", doc.target);
            handle.complete(doc.clone());
            record_job("completed");
            let state = self.registry.snapshot(&doc.target).unwrap_or(state);
            return Ok((doc, state));
        }

        let run = self.batcher.run(hosts);
        tokio::spawn(drive_probe(self.cache.clone(), handle, run));
        Ok((doc, state))
    }
}

fn fail_job(handle: JobHandle, cause: String) {
    error!("Job for {} failed: {}", handle.target(), cause);
    record_job("error");
    handle.fail(cause);
}

/// Single writer for one probe run: folds each batch report into the cached
/// document in arrival order.
async fn drive_probe(cache: ResultCache, handle: JobHandle, mut run: ProbeRun) {
    let target = handle.target().clone();
    let total = run.total_batches();
    let mut reported = 0;

    while let Some(report) = run.next().await {
        reported += 1;
        record_batch(report.outcome.as_str(), report.records.len());
        let records = report.records;

        match cache
            .update(&target, |doc| {
                doc.apply_batch(records);
            })
            .await
        {
            Ok(Some(doc)) => {
                handle.set_progress(doc.progress);
                if doc.probe_status == ProbeStatus::Completed {
                    run.progress().log_summary(&target.to_string());
                    info!(
                        "Probing {} complete: {} record(s)",
                        target,
                        doc.probe_records.len()
                    );
                    handle.complete(doc);
                    record_job("completed");
                    return;
                }
            }
            Ok(None) => {
                fail_job(handle, "result document disappeared during probing".to_string());
                return;
            }
            Err(e) => {
                fail_job(handle, e.to_string());
                return;
            }
        }
    }

    let cause = format!("probe workers stopped after {reported} of {total} batches");
    if let Err(e) = cache.update(&target, |doc| doc.fail(cause.clone())).await {
        warn!("Could not record probe failure for {}: {}", target, e);
    }
    run.progress().log_summary(&target.to_string());
    fail_job(handle, cause);
}
