//! Error taxonomy shared across the engine.
//!
//! `ResolutionError` and `AdmissionError` are reported to the requester
//! immediately. `FailureReason` is the terminal cause recorded on a job.
//! `InternalError` marks a broken contract: it is logged, never shown.

use crate::registry::{JobId, JobState};

/// Why a media link could not be turned into a list of formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    /// The source exists as a reference but yields no usable streams.
    NotFound,
    /// The text is not a recognized video reference.
    Unsupported,
    /// The extraction collaborator failed (network, rate limit, geo-block).
    Upstream,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {detail}")]
pub struct ResolutionError {
    pub kind: ResolutionErrorKind,
    pub detail: String,
}

impl ResolutionError {
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            kind: ResolutionErrorKind::NotFound,
            detail: detail.into(),
        }
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self {
            kind: ResolutionErrorKind::Unsupported,
            detail: detail.into(),
        }
    }

    pub fn upstream(detail: impl Into<String>) -> Self {
        Self {
            kind: ResolutionErrorKind::Upstream,
            detail: detail.into(),
        }
    }
}

/// Terminal cause of a job that did not end in `Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum FailureReason {
    #[error("the job took longer than allowed")]
    TimedOut,
    #[error("the file is too large")]
    TooLarge,
    #[error("the video could not be downloaded")]
    Upstream,
    #[error("local storage failed")]
    Storage,
    #[error("the file could not be converted")]
    Conversion,
    #[error("the file could not be sent")]
    Delivery,
    #[error("cancelled")]
    Cancelled,
    #[error("internal error")]
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("too many requests are waiting (limit {limit})")]
    QueueOverflow { limit: usize },
    #[error("admission controller is closed")]
    Closed,
}

/// Programming-contract violations. Fatal for the job, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    #[error("admission ticket {ticket} released twice")]
    DoubleRelease { ticket: u64 },
    #[error("job {id}: expected state {expected:?}, found {actual:?}")]
    StateMismatch {
        id: JobId,
        expected: JobState,
        actual: JobState,
    },
    #[error("job {0} is not registered")]
    UnknownJob(JobId),
    #[error("job {id}: illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },
}
