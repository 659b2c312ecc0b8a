//! Job registry - single-flight de-duplication of requests per target
//!
//! Process-local and best-effort: nothing here survives a restart and other
//! processes have their own registry. One mutex guards the whole map; it is
//! never held across an await.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use subdex_common::{JobPhase, JobState, JobStatus, ResultDocument, Target};

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Target, JobState>>,
}

/// Result of [`JobRegistry::start_or_join`].
pub enum Admission {
    /// No job existed; the caller owns the new one and must drive it.
    Started(JobHandle),
    /// A job is running; snapshot of its state.
    Running(JobState),
    /// A job had finished and nobody had observed it yet. The entry is gone
    /// now.
    Finished(JobState),
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start_or_join(self: &Arc<Self>, target: &Target) -> Admission {
        let mut jobs = self.jobs.lock();
        if let Some(state) = jobs.remove(target) {
            if state.status != JobStatus::Running {
                return Admission::Finished(state);
            }
            debug!("Joining running job {} for {}", state.id, target);
            let snapshot = state.clone();
            jobs.insert(target.clone(), state);
            return Admission::Running(snapshot);
        }

        let state = JobState::new(target.clone());
        let id = state.id;
        jobs.insert(target.clone(), state);
        Admission::Started(JobHandle {
            registry: Arc::clone(self),
            target: target.clone(),
            id,
            settled: false,
        })
    }

    /// Current state without consuming a terminal entry.
    pub fn snapshot(&self, target: &Target) -> Option<JobState> {
        self.jobs.lock().get(target).cloned()
    }

    /// Current state; a terminal entry is handed out once and removed.
    pub fn observe(&self, target: &Target) -> Option<JobState> {
        let mut jobs = self.jobs.lock();
        let terminal = jobs.get(target)?.status.is_terminal();
        if terminal {
            jobs.remove(target)
        } else {
            jobs.get(target).cloned()
        }
    }

    /// Drop a finished entry nobody has observed. Running jobs are kept.
    pub fn forget_finished(&self, target: &Target) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get(target) {
            Some(state) if state.status.is_terminal() => jobs.remove(target).is_some(),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Apply `f` to the entry only if it still belongs to job `id`.
    fn with_job<F>(&self, target: &Target, id: Uuid, f: F)
    where
        F: FnOnce(&mut JobState),
    {
        if let Some(state) = self.jobs.lock().get_mut(target) {
            if state.id == id {
                f(state);
                state.updated_at = Utc::now();
            }
        }
    }

    fn remove_job(&self, target: &Target, id: Uuid) {
        let mut jobs = self.jobs.lock();
        if jobs.get(target).is_some_and(|s| s.id == id) {
            jobs.remove(target);
        }
    }
}

/// Owner's side of a registered job.
///
/// Dropping a handle that never reported a terminal state marks the job as
/// failed so the registry cannot hold a stuck `running` entry.
pub struct JobHandle {
    registry: Arc<JobRegistry>,
    target: Target,
    id: Uuid,
    settled: bool,
}

impl JobHandle {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> Option<JobState> {
        self.registry
            .snapshot(&self.target)
            .filter(|s| s.id == self.id)
    }

    pub fn set_phase(&self, phase: JobPhase) {
        self.registry.with_job(&self.target, self.id, |s| s.phase = phase);
    }

    pub fn set_progress(&self, progress: u8) {
        self.registry
            .with_job(&self.target, self.id, |s| s.progress = s.progress.max(progress));
    }

    /// Terminal success; the entry waits for one observer.
    pub fn complete(mut self, doc: ResultDocument) {
        self.registry.with_job(&self.target, self.id, |s| {
            s.status = JobStatus::Completed;
            s.phase = JobPhase::of(&doc);
            s.progress = doc.progress;
            s.result = Some(doc);
        });
        self.settled = true;
    }

    /// Terminal failure with a human-readable cause.
    pub fn fail(mut self, cause: impl Into<String>) {
        self.mark_failed(cause.into());
        self.settled = true;
    }

    /// Remove the entry; the owner delivered the result to its caller itself.
    pub fn release(mut self) {
        self.registry.remove_job(&self.target, self.id);
        self.settled = true;
    }

    fn mark_failed(&self, cause: String) {
        self.registry.with_job(&self.target, self.id, |s| {
            s.status = JobStatus::Error;
            s.phase = JobPhase::Error;
            s.error = Some(cause);
        });
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Job {} for {} dropped before finishing", self.id, self.target);
            self.mark_failed("job abandoned".to_string());
        }
    }
}
