//! Delivery pipeline: convert if needed, then hand the file to the transport.
//!
//! Downloaded → Delivering → Delivered. Conversion runs as a scoped
//! subprocess; transfer failures get one immediate retry. The engine removes
//! the job's files afterwards whatever the outcome.

mod route;

pub use route::{plan, DeliveryPlan, TransportProfile};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::FailureReason;
use crate::ffmpeg::{ConversionRequest, MediaConverter};
use crate::gateway::{DeliveryRoute, Gateway, OutboundFile, Status, TransportError};
use crate::registry::{Job, JobId, JobPatch, JobRegistry, JobState};
use crate::retry::{run_with_retry, ErrorKind, RetryPolicy};
use crate::storage::JobStorage;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{size} bytes exceed every transport ceiling ({ceiling})")]
    NoRoute { size: u64, ceiling: u64 },
    #[error("transfer failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

pub struct DeliveryPipeline {
    registry: Arc<JobRegistry>,
    gateway: Arc<dyn Gateway>,
    converter: Arc<dyn MediaConverter>,
    storage: JobStorage,
    conversion_timeout: Duration,
    retry: RetryPolicy,
}

impl DeliveryPipeline {
    pub fn new(
        registry: Arc<JobRegistry>,
        gateway: Arc<dyn Gateway>,
        converter: Arc<dyn MediaConverter>,
        storage: JobStorage,
        conversion_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            converter,
            storage,
            conversion_timeout,
            retry: RetryPolicy::delivery(),
        }
    }

    pub async fn deliver(&self, id: JobId, abort: &CancellationToken) -> Result<Job, FailureReason> {
        let job = self
            .registry
            .transition(id, JobState::Downloaded, JobState::Delivering, JobPatch::none())
            .map_err(|e| e.interruption())?;

        match self.transfer(&job, abort).await {
            Ok(()) => self
                .registry
                .transition(id, JobState::Delivering, JobState::Delivered, JobPatch::none())
                .map_err(|e| e.interruption()),
            Err(reason) => {
                let state = self.registry.fail(id, JobState::Delivering, reason);
                tracing::info!(job_id = id, reason = ?reason, state = state.as_str(), "delivery stopped");
                Err(state.failure().unwrap_or(reason))
            }
        }
    }

    async fn transfer(&self, job: &Job, abort: &CancellationToken) -> Result<(), FailureReason> {
        let id = job.id;
        if let Err(e) = self.gateway.send_status(job.key, &Status::Uploading).await {
            tracing::warn!(job_id = id, "status not sent: {}", e);
        }

        let Some(downloaded) = job.local_path.clone() else {
            tracing::error!(job_id = id, "delivering job has no local file");
            return Err(FailureReason::Internal);
        };

        let profile = self.gateway.profile();
        let target = profile.expected_container(job.format.kind).to_string();
        // A separate audio track always goes through the muxer.
        let (path, known_size) = if job.format.container == target && job.audio_path.is_none() {
            (downloaded, job.size_bytes)
        } else {
            (self.convert(job, &downloaded, &target, abort).await?, None)
        };

        let size = match known_size {
            Some(size) => size,
            None => file_len(&path).await.map_err(|e| {
                tracing::error!(job_id = id, "cannot stat {}: {}", path.display(), e);
                FailureReason::Storage
            })?,
        };

        let file_name = format!("{}-{}.{}", job.source.video_id(), job.format.label, target);
        let transfers = match plan(&profile, size) {
            DeliveryPlan::Single(route) => vec![(route, None)],
            DeliveryPlan::Chunked(parts) => parts
                .into_iter()
                .map(|p| (DeliveryRoute::Chunked, Some(p)))
                .collect(),
            DeliveryPlan::Rejected { size, ceiling } => {
                let e = DeliveryError::NoRoute { size, ceiling };
                tracing::warn!(job_id = id, "{}", e);
                return Err(FailureReason::Delivery);
            }
        };
        tracing::debug!(job_id = id, size, transfers = transfers.len(), "delivery planned");

        for (route, part) in transfers {
            let file = OutboundFile {
                job_id: id,
                path: path.clone(),
                declared_size: size,
                kind: job.format.kind,
                file_name: file_name.clone(),
                route,
                part,
            };
            self.send(job, &file, abort).await?;
        }
        Ok(())
    }

    async fn send(&self, job: &Job, file: &OutboundFile, abort: &CancellationToken) -> Result<(), FailureReason> {
        let attempt = run_with_retry(
            &self.retry,
            |e: &TransportError| {
                if e.is_transient() {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Permanent
                }
            },
            |n| {
                if n > 1 {
                    tracing::info!(job_id = job.id, attempt = n, "retrying delivery");
                }
                self.gateway.send_file(job.key, file)
            },
        );
        let result = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(FailureReason::Cancelled),
            _ = sleep_until(job.deadline) => return Err(FailureReason::TimedOut),
            r = attempt => r,
        };
        result.map_err(|(source, attempts)| {
            let e = DeliveryError::Transport { attempts, source };
            tracing::warn!(job_id = job.id, part = ?file.part.map(|p| p.index), "{}", e);
            FailureReason::Delivery
        })
    }

    async fn convert(
        &self,
        job: &Job,
        input: &Path,
        container: &str,
        abort: &CancellationToken,
    ) -> Result<PathBuf, FailureReason> {
        let output = self.storage.job_dir(job.id).join(format!("{}.out.{}", job.id, container));
        let req = ConversionRequest {
            input: input.to_path_buf(),
            audio: job.audio_path.clone(),
            output: output.clone(),
            kind: job.format.kind,
            container: container.to_string(),
        };
        let budget = self
            .conversion_timeout
            .min(job.deadline.saturating_duration_since(Instant::now()));
        tracing::debug!(
            job_id = job.id,
            from = %job.format.container,
            to = container,
            with_audio = req.audio.is_some(),
            "converting"
        );

        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(FailureReason::Cancelled),
            _ = sleep_until(job.deadline) => Err(FailureReason::TimedOut),
            r = self.converter.convert(&req, budget) => match r {
                Ok(()) => Ok(output),
                Err(e) => {
                    tracing::warn!(job_id = job.id, "conversion failed: {}", e);
                    Err(FailureReason::Conversion)
                }
            },
        }
    }
}

async fn file_len(path: &Path) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}
