//! The task that drives one job from admission to cleanup.

use std::sync::Arc;

use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;

use crate::admission::{PendingAdmission, TicketGuard};
use crate::control::ControlRegistration;
use crate::error::{AdmissionError, FailureReason};
use crate::gateway::Status;
use crate::registry::{JobId, JobPatch, JobState};

use super::{send_status, EngineInner};

pub(super) async fn run_job(
    inner: Arc<EngineInner>,
    id: JobId,
    pending: PendingAdmission,
    abort: CancellationToken,
) {
    let _registration = ControlRegistration::new(Arc::clone(&inner.control), id);
    let outcome = execute(&inner, id, pending, &abort).await;
    if let Err(reason) = outcome {
        tracing::debug!(job_id = id, ?reason, "job ended without delivery");
    }
    finish(&inner, id).await;
}

async fn execute(
    inner: &EngineInner,
    id: JobId,
    pending: PendingAdmission,
    abort: &CancellationToken,
) -> Result<(), FailureReason> {
    let Some(job) = inner.registry.get(id) else {
        tracing::error!(job_id = id, "job task started for unknown job");
        return Err(FailureReason::Internal);
    };

    let position = pending.position();
    if position > 0 {
        send_status(inner, job.key, Status::Queued { position }).await;
    }

    // Dropping the wait (cancel, deadline) gives the queue place back.
    let ticket = tokio::select! {
        biased;
        _ = abort.cancelled() => {
            let state = inner.registry.cancel(id);
            return Err(state.and_then(JobState::failure).unwrap_or(FailureReason::Cancelled));
        }
        _ = sleep_until(job.deadline) => {
            tracing::info!(job_id = id, "deadline passed while queued");
            let state = inner.registry.fail(id, JobState::Selecting, FailureReason::TimedOut);
            return Err(state.failure().unwrap_or(FailureReason::TimedOut));
        }
        admitted = pending.wait() => match admitted {
            Ok(ticket) => ticket,
            Err(AdmissionError::Closed) | Err(AdmissionError::QueueOverflow { .. }) => {
                let state = inner.registry.fail(id, JobState::Selecting, FailureReason::Cancelled);
                return Err(state.failure().unwrap_or(FailureReason::Cancelled));
            }
        },
    };
    let guard = TicketGuard::new(Arc::clone(&inner.admission), ticket);

    inner
        .registry
        .transition(id, JobState::Selecting, JobState::Admitted, JobPatch::none())
        .map_err(|e| e.interruption())?;
    tracing::info!(job_id = id, in_use = inner.admission.in_use(), "job admitted");
    send_status(inner, job.key, Status::Downloading).await;

    let result = async {
        inner.worker.run(id, abort).await?;
        inner.delivery.deliver(id, abort).await
    }
    .await;

    if let Err(e) = guard.release() {
        tracing::error!(job_id = id, "{}", e);
    }
    result.map(|_| ())
}

/// Release storage, report the outcome once and mark the job cleaned up.
async fn finish(inner: &EngineInner, id: JobId) {
    if let Err(e) = inner.storage.remove_job(id).await {
        tracing::error!(job_id = id, "cleanup failed: {:#}", e);
    }

    let Some(mut job) = inner.registry.get(id) else {
        return;
    };
    if job.state.is_pending() {
        tracing::error!(job_id = id, state = job.state.as_str(), "job task ended in a non-terminal state");
        if let Some(state) = inner
            .registry
            .force_stop(id, JobState::Failed(FailureReason::Internal))
        {
            job.state = state;
        }
    }

    let status = match job.state {
        JobState::Delivered => Some(Status::Completed),
        JobState::Cancelled => Some(Status::Cancelled),
        JobState::Failed(reason) => Some(Status::Failed(reason)),
        _ => None,
    };
    if let Some(status) = status {
        send_status(inner, job.key, status).await;
    }

    match inner
        .registry
        .transition(id, job.state, JobState::CleanedUp, JobPatch::none())
    {
        Ok(_) => tracing::info!(job_id = id, outcome = job.state.as_str(), "job finished"),
        Err(e) => match e.contract_violation() {
            Some(violation) => tracing::error!(job_id = id, "cannot mark cleaned up: {}", violation),
            None => tracing::warn!(job_id = id, "cannot mark cleaned up: {}", e),
        },
    }
}
