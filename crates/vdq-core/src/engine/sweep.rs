//! Periodic retention pass.

use crate::registry::{JobId, JobPatch, JobState};

use super::EngineInner;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Terminal jobs whose task was gone and were cleaned here.
    pub cleaned: Vec<JobId>,
    /// Cleaned-up jobs evicted from the registry.
    pub evicted: Vec<JobId>,
    pub expired_selections: usize,
    /// Job directories on disk with no live job, removed.
    pub orphan_dirs: Vec<JobId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.cleaned.is_empty()
            && self.evicted.is_empty()
            && self.expired_selections == 0
            && self.orphan_dirs.is_empty()
    }
}

pub(super) async fn sweep(inner: &EngineInner) -> SweepReport {
    let mut report = SweepReport::default();

    for job in inner.registry.terminal_uncleaned() {
        // A registered job still has its task, which cleans up itself.
        if inner.control.is_registered(job.id) {
            continue;
        }
        if let Err(e) = inner.storage.remove_job(job.id).await {
            tracing::error!(job_id = job.id, "sweep cleanup failed: {:#}", e);
            continue;
        }
        if inner
            .registry
            .transition(job.id, job.state, JobState::CleanedUp, JobPatch::none())
            .is_ok()
        {
            report.cleaned.push(job.id);
        }
    }

    report.evicted = inner.registry.sweep(inner.config.retention());
    report.expired_selections = inner.sessions.expire(inner.config.job_timeout());
    inner.throttle.prune();

    match inner.storage.list_job_dirs().await {
        Ok(ids) => {
            for id in ids {
                let live = inner
                    .registry
                    .get(id)
                    .is_some_and(|j| j.state != JobState::CleanedUp);
                if live || inner.control.is_registered(id) {
                    continue;
                }
                if matches!(inner.storage.remove_job(id).await, Ok(true)) {
                    tracing::warn!(job_id = id, "removed orphaned job dir");
                    report.orphan_dirs.push(id);
                }
            }
        }
        Err(e) => tracing::warn!("cannot scan download dir: {:#}", e),
    }

    report
}
