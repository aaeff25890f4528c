//! The orchestration engine: inbound hooks for the chat transport.
//!
//! `on_media_link` resolves a link and offers formats, `on_format_chosen`
//! creates a job and spawns its task, `on_cancel` stops whatever the
//! conversation has in flight. None of them wait for a download; each job
//! runs as its own task (see `job.rs`).

mod job;
mod session;
mod sweep;

pub use session::{Selection, SelectionSessions};
pub use sweep::SweepReport;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::admission::AdmissionController;
use crate::config::VdqConfig;
use crate::control::JobControl;
use crate::delivery::DeliveryPipeline;
use crate::error::{AdmissionError, ResolutionError};
use crate::extractor::Extractor;
use crate::ffmpeg::MediaConverter;
use crate::format::{resolve, FormatHandle, FormatOption};
use crate::gateway::{ConversationKey, Gateway, RejectReason, Status};
use crate::media::MediaSource;
use crate::registry::{Job, JobId, JobRegistry, JobState};
use crate::storage::JobStorage;
use crate::throttle::RequestThrottle;
use crate::worker::DownloadWorker;

/// External systems the engine talks to.
pub struct Collaborators {
    pub extractor: Arc<dyn Extractor>,
    pub converter: Arc<dyn MediaConverter>,
    pub gateway: Arc<dyn Gateway>,
}

/// Why an inbound event produced no selection or job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InboundError {
    #[error("event dropped by throttle")]
    Throttled,
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("no pending selection contains this format")]
    SelectionExpired,
    #[error("admission refused: {0}")]
    Admission(#[from] AdmissionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A running or queued job was cancelled.
    Job(JobId),
    /// Only a pending selection existed; it was cleared.
    Selection,
    Nothing,
}

pub(crate) struct EngineInner {
    pub(crate) config: Arc<VdqConfig>,
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) admission: Arc<AdmissionController>,
    pub(crate) control: Arc<JobControl>,
    pub(crate) sessions: SelectionSessions,
    pub(crate) throttle: RequestThrottle,
    pub(crate) extractor: Arc<dyn Extractor>,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) storage: JobStorage,
    pub(crate) worker: DownloadWorker,
    pub(crate) delivery: DeliveryPipeline,
}

/// Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Build an engine storing per-job files under `download_root`.
    pub fn new(config: VdqConfig, download_root: impl Into<PathBuf>, collab: Collaborators) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(JobRegistry::new(config.job_timeout()));
        let storage = JobStorage::new(download_root);
        let worker = DownloadWorker::new(
            Arc::clone(&registry),
            Arc::clone(&collab.extractor),
            storage.clone(),
            config.max_file_size_bytes,
        );
        let delivery = DeliveryPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&collab.gateway),
            collab.converter,
            storage.clone(),
            std::time::Duration::from_secs(config.converter.timeout_secs),
        );
        tracing::info!(
            max_concurrent = config.max_concurrent_jobs,
            max_queued = ?config.max_queued_jobs,
            timeout_secs = config.job_timeout_secs,
            root = %storage.root().display(),
            "engine started"
        );
        let inner = EngineInner {
            admission: Arc::new(AdmissionController::new(
                config.max_concurrent_jobs,
                config.max_queued_jobs,
            )),
            control: Arc::new(JobControl::new()),
            sessions: SelectionSessions::new(),
            throttle: RequestThrottle::new(config.throttle_interval()),
            extractor: collab.extractor,
            gateway: collab.gateway,
            registry,
            storage,
            worker,
            delivery,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &VdqConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.inner.admission
    }

    pub fn sessions(&self) -> &SelectionSessions {
        &self.inner.sessions
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.inner.registry.get(id)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.inner.registry.list()
    }

    async fn status(&self, key: ConversationKey, status: Status) {
        send_status(&self.inner, key, status).await;
    }

    /// Stop the conversation's pending job, if any. The job task reports the
    /// cancellation to the requester.
    fn cancel_active(&self, key: ConversationKey) -> Option<JobId> {
        let job = self.inner.registry.find_pending(key)?;
        let state = self.inner.registry.cancel(job.id);
        self.inner.control.request_abort(job.id);
        tracing::info!(job_id = job.id, conversation = %key, state = ?state, "job cancelled");
        Some(job.id)
    }

    /// A media link arrived. Resolves it and offers the formats.
    ///
    /// Supersedes any selection or job the conversation already had.
    pub async fn on_media_link(
        &self,
        key: ConversationKey,
        text: &str,
    ) -> Result<Vec<FormatOption>, InboundError> {
        if !self.inner.throttle.check(key.requester) {
            tracing::debug!(conversation = %key, "event throttled");
            return Err(InboundError::Throttled);
        }
        let source = match MediaSource::parse(text) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(conversation = %key, "rejected link: {}", e);
                self.status(key, Status::Rejected(RejectReason::from(&e))).await;
                return Err(e.into());
            }
        };

        self.cancel_active(key);
        self.inner.sessions.remove(key);
        self.status(key, Status::Processing).await;

        let options = match resolve(self.inner.extractor.as_ref(), &source).await {
            Ok(options) => options,
            Err(e) => {
                tracing::info!(conversation = %key, source = %source, "resolution failed: {}", e);
                self.status(key, Status::Rejected(RejectReason::from(&e))).await;
                return Err(e.into());
            }
        };

        self.inner
            .sessions
            .insert(key, source.clone(), options.clone());
        if let Err(e) = self
            .inner
            .gateway
            .send_options(key, &source, &options)
            .await
        {
            tracing::warn!(conversation = %key, "options not sent: {}", e);
        }
        Ok(options)
    }

    /// The requester picked one of the offered formats.
    ///
    /// Creates the job and starts its task; returns without waiting for
    /// admission. When the wait queue is full no job is created.
    pub async fn on_format_chosen(
        &self,
        key: ConversationKey,
        handle: &FormatHandle,
    ) -> Result<JobId, InboundError> {
        if !self.inner.throttle.check(key.requester) {
            tracing::debug!(conversation = %key, "event throttled");
            return Err(InboundError::Throttled);
        }
        let Some((source, option)) = self.inner.sessions.take_choice(key, handle) else {
            tracing::debug!(conversation = %key, handle = %handle, "selection expired");
            self.status(key, Status::SelectionExpired).await;
            return Err(InboundError::SelectionExpired);
        };

        self.cancel_active(key);

        let id = self.inner.registry.allocate_id();
        let pending = match self.inner.admission.enqueue(id) {
            Ok(p) => p,
            Err(e) => {
                let reason = match e {
                    AdmissionError::QueueOverflow { .. } => RejectReason::Busy,
                    AdmissionError::Closed => RejectReason::Unavailable,
                };
                self.status(key, Status::Rejected(reason)).await;
                return Err(e.into());
            }
        };
        self.inner.registry.insert(id, key, source, option);
        let abort = self.inner.control.register(id);
        tokio::spawn(job::run_job(Arc::clone(&self.inner), id, pending, abort));
        Ok(id)
    }

    /// Cancel whatever the conversation has in flight. Cancels are never
    /// throttled; a cancel with nothing pending does nothing.
    pub async fn on_cancel(&self, key: ConversationKey) -> CancelOutcome {
        if let Some(id) = self.cancel_active(key) {
            return CancelOutcome::Job(id);
        }
        if self.inner.sessions.remove(key) {
            self.status(key, Status::Cancelled).await;
            return CancelOutcome::Selection;
        }
        CancelOutcome::Nothing
    }

    /// Wait until the job has reached a terminal state.
    pub async fn wait_for_terminal(&self, id: JobId) -> Option<Job> {
        self.inner.registry.wait_terminal(id).await
    }

    /// Wait until the job's resources are released and its outcome reported.
    pub async fn wait_for_cleanup(&self, id: JobId) -> Option<Job> {
        self.inner
            .registry
            .wait_until(id, |s| s == JobState::CleanedUp)
            .await
    }

    /// One retention pass: clean orphaned terminal jobs, evict old ones,
    /// expire stale selections.
    pub async fn sweep_once(&self) -> SweepReport {
        sweep::sweep(&self.inner).await
    }

    /// Run `sweep_once` every `sweep_interval_secs` until the task is aborted.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(engine.inner.config.sweep_interval());
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                let report = engine.sweep_once().await;
                if !report.is_empty() {
                    tracing::debug!(?report, "sweep");
                }
            }
        })
    }

    /// Refuse new jobs and stop every running one.
    pub fn shutdown(&self) {
        tracing::info!("engine shutting down");
        self.inner.admission.close();
        for job in self.inner.registry.list() {
            if job.state.is_pending() {
                self.inner.registry.cancel(job.id);
            }
        }
        self.inner.control.abort_all();
    }
}

pub(crate) async fn send_status(inner: &EngineInner, key: ConversationKey, status: Status) {
    if let Err(e) = inner.gateway.send_status(key, &status).await {
        tracing::warn!(conversation = %key, ?status, "status not sent: {}", e);
    }
}
