use crate::error::FailureReason;

/// Lifecycle state of a job.
///
/// Success path: Selecting → Admitted → Downloading → Downloaded →
/// Delivering → Delivered. `Failed` and `Cancelled` are reachable from any
/// non-terminal state; `CleanedUp` only from a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Selecting,
    Admitted,
    Downloading,
    Downloaded,
    Delivering,
    Delivered,
    Failed(FailureReason),
    Cancelled,
    CleanedUp,
}

impl JobState {
    /// Terminal state for a job that stopped for `reason`.
    pub fn stopped(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Cancelled => JobState::Cancelled,
            other => JobState::Failed(other),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Delivered | JobState::Failed(_) | JobState::Cancelled
        )
    }

    /// Not yet terminal: the job can still make progress or be stopped.
    pub fn is_pending(self) -> bool {
        !self.is_terminal() && self != JobState::CleanedUp
    }

    /// States that require an admission ticket.
    pub fn holds_slot(self) -> bool {
        matches!(
            self,
            JobState::Admitted
                | JobState::Downloading
                | JobState::Downloaded
                | JobState::Delivering
        )
    }

    /// Reason a stopped job reports; None for pending, delivered or cleaned jobs.
    pub fn failure(self) -> Option<FailureReason> {
        match self {
            JobState::Failed(reason) => Some(reason),
            JobState::Cancelled => Some(FailureReason::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Selecting, Admitted)
            | (Admitted, Downloading)
            | (Downloading, Downloaded)
            | (Downloaded, Delivering)
            | (Delivering, Delivered) => true,
            (from, Failed(_) | Cancelled) => from.is_pending(),
            (from, CleanedUp) => from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Selecting => "selecting",
            JobState::Admitted => "admitted",
            JobState::Downloading => "downloading",
            JobState::Downloaded => "downloaded",
            JobState::Delivering => "delivering",
            JobState::Delivered => "delivered",
            JobState::Failed(_) => "failed",
            JobState::Cancelled => "cancelled",
            JobState::CleanedUp => "cleaned_up",
        }
    }
}
