//! Job control for cancellation: one cancellation token per running job.
//!
//! Each job task is registered with a [`CancellationToken`]. A cancel request
//! (or a superseding request from the same conversation) cancels the token;
//! the download and delivery loops select on `cancelled()` and stop.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::registry::JobId;

/// Shared map of job id -> cancellation token for jobs that have a running task.
#[derive(Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<JobId, CancellationToken>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job; returns the token to pass to its task.
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, token.clone());
        token
    }

    /// Unregister a job (call when its task finishes, whatever the outcome).
    pub fn unregister(&self, job_id: JobId) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
    }

    /// Signal the job's task to stop. Returns false if no task is registered.
    pub fn request_abort(&self, job_id: JobId) -> bool {
        match self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&job_id)
    }

    /// Abort every registered job.
    pub fn abort_all(&self) {
        for token in self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            token.cancel();
        }
    }
}

/// Unregisters the job when the task that owns it ends, even on panic.
pub struct ControlRegistration {
    control: Arc<JobControl>,
    job_id: JobId,
}

impl ControlRegistration {
    pub fn new(control: Arc<JobControl>, job_id: JobId) -> Self {
        Self { control, job_id }
    }
}

impl Drop for ControlRegistration {
    fn drop(&mut self) {
        self.control.unregister(self.job_id);
    }
}
