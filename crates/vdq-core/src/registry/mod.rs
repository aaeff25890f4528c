//! In-memory job registry: the single owner of job state.
//!
//! Every state change goes through [`JobRegistry::transition`], a
//! compare-and-set on the current state. A worker that races a cancellation
//! and loses sees `StateMismatch` instead of overwriting the cancel.
//! Pending jobs past their deadline are forced into `Failed(TimedOut)` by
//! the first transition attempt that notices.

mod state;

pub use state::JobState;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{FailureReason, InternalError};
use crate::format::FormatOption;
use crate::gateway::ConversationKey;
use crate::media::MediaSource;

/// Job identifier, unique for the lifetime of the process.
pub type JobId = u64;

const EVENT_CAPACITY: usize = 256;

/// Snapshot of one job. Returned by value; never a partially written record.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub key: ConversationKey,
    pub source: MediaSource,
    pub format: FormatOption,
    pub state: JobState,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub deadline: Instant,
    pub finished_at: Option<Instant>,
    pub cleaned_at: Option<Instant>,
    /// Terminal state the job ended in; kept after cleanup.
    pub outcome: Option<JobState>,
    /// Set once downloaded; cleared on cleanup.
    pub local_path: Option<PathBuf>,
    /// Downloaded audio companion of a video-only format; cleared on cleanup.
    pub audio_path: Option<PathBuf>,
    /// Bytes downloaded, companion audio included.
    pub size_bytes: Option<u64>,
}

impl Job {
    /// Why the job did not deliver, once it is over.
    pub fn failure(&self) -> Option<FailureReason> {
        self.outcome.and_then(JobState::failure)
    }
}

/// Optional fields recorded together with a transition.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub local_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
}

impl JobPatch {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn downloaded(path: PathBuf, size: u64) -> Self {
        Self {
            local_path: Some(path),
            audio_path: None,
            size_bytes: Some(size),
        }
    }

    pub fn with_audio(mut self, path: Option<PathBuf>) -> Self {
        self.audio_path = path;
        self
    }
}

/// Broadcast on every successful state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobEvent {
    pub id: JobId,
    pub from: JobState,
    pub to: JobState,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("job {id}: expected {expected:?}, found {actual:?}")]
    StateMismatch {
        id: JobId,
        expected: JobState,
        actual: JobState,
    },
    /// The deadline had passed; the job is now `Failed(TimedOut)`.
    #[error("job {0} exceeded its deadline")]
    TimedOut(JobId),
    #[error("job {0} is not registered")]
    UnknownJob(JobId),
    #[error("job {id}: illegal transition {from:?} -> {to:?}")]
    Illegal {
        id: JobId,
        from: JobState,
        to: JobState,
    },
}

impl TransitionError {
    /// Reason the caller should stop with after losing a transition race.
    pub fn interruption(&self) -> FailureReason {
        match self {
            TransitionError::TimedOut(_) => FailureReason::TimedOut,
            TransitionError::StateMismatch { actual, .. } => {
                actual.failure().unwrap_or(FailureReason::Internal)
            }
            TransitionError::UnknownJob(_) | TransitionError::Illegal { .. } => {
                FailureReason::Internal
            }
        }
    }

    /// The broken contract behind this error, if any. Losing a race to the
    /// deadline or to a terminal state is not one.
    pub fn contract_violation(&self) -> Option<InternalError> {
        match *self {
            TransitionError::TimedOut(_) => None,
            TransitionError::StateMismatch { actual, .. } if !actual.is_pending() => None,
            TransitionError::StateMismatch {
                id,
                expected,
                actual,
            } => Some(InternalError::StateMismatch {
                id,
                expected,
                actual,
            }),
            TransitionError::UnknownJob(id) => Some(InternalError::UnknownJob(id)),
            TransitionError::Illegal { id, from, to } => {
                Some(InternalError::IllegalTransition { id, from, to })
            }
        }
    }
}

pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
    next_id: AtomicU64,
    timeout: Duration,
    events: broadcast::Sender<JobEvent>,
}

impl JobRegistry {
    /// Create a registry whose jobs expire `timeout` after creation.
    pub fn new(timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, id: JobId, from: JobState, to: JobState) {
        tracing::debug!(job_id = id, from = from.as_str(), to = to.as_str(), "job transition");
        // No receivers is fine.
        let _ = self.events.send(JobEvent { id, from, to });
    }

    /// Reserve a job id without registering a job.
    pub fn allocate_id(&self) -> JobId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a new job in `Selecting`; its deadline starts now.
    pub fn create(&self, key: ConversationKey, source: MediaSource, format: FormatOption) -> JobId {
        let id = self.allocate_id();
        self.insert(id, key, source, format);
        id
    }

    /// Register a job under an id obtained from [`allocate_id`](Self::allocate_id).
    pub fn insert(&self, id: JobId, key: ConversationKey, source: MediaSource, format: FormatOption) {
        let now = Instant::now();
        let job = Job {
            id,
            key,
            source,
            format,
            state: JobState::Selecting,
            created_at: now,
            started_at: None,
            deadline: now + self.timeout,
            finished_at: None,
            cleaned_at: None,
            outcome: None,
            local_path: None,
            audio_path: None,
            size_bytes: None,
        };
        self.lock().insert(id, job);
        tracing::info!(job_id = id, requester = key.requester, "job created");
    }

    /// Compare-and-set: move job `id` from `expected` to `next`.
    ///
    /// Exactly one of several concurrent callers with the same `expected`
    /// succeeds. A pending job past its deadline is moved to
    /// `Failed(TimedOut)` instead and `TimedOut` is returned.
    pub fn transition(
        &self,
        id: JobId,
        expected: JobState,
        next: JobState,
        patch: JobPatch,
    ) -> Result<Job, TransitionError> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&id).ok_or(TransitionError::UnknownJob(id))?;
        let now = Instant::now();

        if job.state.is_pending() && now > job.deadline {
            let from = job.state;
            job.state = JobState::Failed(FailureReason::TimedOut);
            job.outcome = Some(job.state);
            job.finished_at = Some(now);
            drop(jobs);
            tracing::warn!(job_id = id, from = from.as_str(), "job deadline exceeded");
            self.emit(id, from, JobState::Failed(FailureReason::TimedOut));
            return Err(TransitionError::TimedOut(id));
        }

        if job.state != expected {
            return Err(TransitionError::StateMismatch {
                id,
                expected,
                actual: job.state,
            });
        }
        if !expected.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                id,
                from: expected,
                to: next,
            });
        }

        job.state = next;
        if let Some(path) = patch.local_path {
            job.local_path = Some(path);
        }
        if let Some(path) = patch.audio_path {
            job.audio_path = Some(path);
        }
        if let Some(size) = patch.size_bytes {
            job.size_bytes = Some(size);
        }
        match next {
            JobState::Downloading => job.started_at = Some(now),
            JobState::CleanedUp => {
                job.cleaned_at = Some(now);
                job.local_path = None;
                job.audio_path = None;
            }
            s if s.is_terminal() => {
                job.finished_at = Some(now);
                job.outcome = Some(s);
            }
            _ => {}
        }
        let snapshot = job.clone();
        drop(jobs);

        self.emit(id, expected, next);
        Ok(snapshot)
    }

    /// Stop job `id` (expected in `expected`) for `reason` and return the
    /// terminal state it actually ended in. When a cancel or the deadline
    /// got there first, that state wins.
    pub fn fail(&self, id: JobId, expected: JobState, reason: FailureReason) -> JobState {
        match self.transition(id, expected, JobState::stopped(reason), JobPatch::none()) {
            Ok(job) => job.state,
            Err(e) => match e.contract_violation() {
                None => match e {
                    TransitionError::StateMismatch { actual, .. } => actual,
                    _ => JobState::Failed(FailureReason::TimedOut),
                },
                Some(violation) => {
                    tracing::error!(job_id = id, "cannot record failure: {}", violation);
                    self.force_stop(id, JobState::Failed(FailureReason::Internal))
                        .unwrap_or(JobState::Failed(FailureReason::Internal))
                }
            },
        }
    }

    /// Move a pending job to `target` (Cancelled or Failed) from whatever
    /// state it is in, retrying the compare-and-set if it races.
    /// Returns the terminal state reached, or None for unknown jobs.
    pub fn force_stop(&self, id: JobId, target: JobState) -> Option<JobState> {
        loop {
            let current = self.get(id)?.state;
            if !current.is_pending() {
                return Some(current);
            }
            match self.transition(id, current, target, JobPatch::none()) {
                Ok(job) => return Some(job.state),
                Err(TransitionError::TimedOut(_)) => {
                    return Some(JobState::Failed(FailureReason::TimedOut))
                }
                Err(TransitionError::StateMismatch { .. }) => continue,
                Err(e) => {
                    if let Some(violation) = e.contract_violation() {
                        tracing::error!(job_id = id, "force stop failed: {}", violation);
                    }
                    return self.get(id).map(|j| j.state);
                }
            }
        }
    }

    /// Request cancellation; returns the terminal state the job ended in.
    pub fn cancel(&self, id: JobId) -> Option<JobState> {
        self.force_stop(id, JobState::Cancelled)
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().get(&id).cloned()
    }

    /// Most recent pending job of a conversation, if any.
    pub fn find_pending(&self, key: ConversationKey) -> Option<Job> {
        self.lock()
            .values()
            .filter(|j| j.key == key && j.state.is_pending())
            .max_by_key(|j| j.id)
            .cloned()
    }

    /// All jobs ordered by id.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Terminal jobs whose resources have not been released yet.
    pub fn terminal_uncleaned(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .lock()
            .values()
            .filter(|j| j.state.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Number of jobs currently in a ticket-holding state.
    pub fn slot_holders(&self) -> usize {
        self.lock().values().filter(|j| j.state.holds_slot()).count()
    }

    /// Evict cleaned-up jobs older than `retention`. Returns evicted ids.
    pub fn sweep(&self, retention: Duration) -> Vec<JobId> {
        let now = Instant::now();
        let mut jobs = self.lock();
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|j| {
                j.state == JobState::CleanedUp
                    && j.cleaned_at.is_some_and(|t| now.duration_since(t) >= retention)
            })
            .map(|j| j.id)
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        expired
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Wait until job `id` is terminal (or cleaned up) and return its snapshot.
    /// Returns None if the job is unknown or was evicted.
    pub async fn wait_terminal(&self, id: JobId) -> Option<Job> {
        self.wait_until(id, |s| !s.is_pending()).await
    }

    /// Wait until the state of job `id` satisfies `done`.
    pub async fn wait_until<F>(&self, id: JobId, done: F) -> Option<Job>
    where
        F: Fn(JobState) -> bool,
    {
        let mut events = self.subscribe();
        loop {
            let job = self.get(id)?;
            if done(job.state) {
                return Some(job);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return self.get(id),
            }
        }
    }
}
