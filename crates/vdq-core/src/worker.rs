//! Download worker: streams one job's chosen format to its temp directory.
//! A video-only format is followed by its audio companion in the same job
//! directory, both counted against one size ceiling.
//!
//! Runs under an admission ticket. Every read is raced against the job's
//! abort token and its deadline, so a cancel or timeout closes the source
//! stream at the next I/O checkpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;

use crate::error::FailureReason;
use crate::extractor::{ExtractError, Extractor};
use crate::format::FormatHandle;
use crate::registry::{Job, JobId, JobPatch, JobRegistry, JobState};
use crate::storage::{temp_path, JobStorage, StorageWriter};

const READ_BUF: usize = 64 * 1024;

pub struct DownloadWorker {
    registry: Arc<JobRegistry>,
    extractor: Arc<dyn Extractor>,
    storage: JobStorage,
    max_file_size: u64,
}

impl DownloadWorker {
    pub fn new(
        registry: Arc<JobRegistry>,
        extractor: Arc<dyn Extractor>,
        storage: JobStorage,
        max_file_size: u64,
    ) -> Self {
        Self {
            registry,
            extractor,
            storage,
            max_file_size,
        }
    }

    /// Admitted → Downloading → Downloaded. On any failure the job's files
    /// are removed and the terminal reason it ended with is returned (which
    /// may be a cancel or timeout that won the race).
    pub async fn run(&self, id: JobId, abort: &CancellationToken) -> Result<Job, FailureReason> {
        let job = self
            .registry
            .transition(id, JobState::Admitted, JobState::Downloading, JobPatch::none())
            .map_err(|e| e.interruption())?;

        let Downloaded { path, audio, size } = match self.download(&job, abort).await {
            Ok(done) => done,
            Err(reason) => {
                self.discard(id).await;
                let state = self.registry.fail(id, JobState::Downloading, reason);
                tracing::info!(job_id = id, reason = ?reason, state = state.as_str(), "download stopped");
                return Err(state.failure().unwrap_or(reason));
            }
        };

        match self.registry.transition(
            id,
            JobState::Downloading,
            JobState::Downloaded,
            JobPatch::downloaded(path, size).with_audio(audio),
        ) {
            Ok(job) => {
                tracing::info!(job_id = id, bytes = size, "download complete");
                Ok(job)
            }
            Err(e) => {
                self.discard(id).await;
                Err(e.interruption())
            }
        }
    }

    async fn discard(&self, id: JobId) {
        if let Err(e) = self.storage.remove_job(id).await {
            tracing::error!(job_id = id, "failed to remove partial download: {:#}", e);
        }
    }

    fn check_size(&self, id: JobId, size: u64) -> Result<(), FailureReason> {
        if size > self.max_file_size {
            tracing::info!(job_id = id, size, max = self.max_file_size, "file too large");
            return Err(FailureReason::TooLarge);
        }
        Ok(())
    }

    async fn download(&self, job: &Job, abort: &CancellationToken) -> Result<Downloaded, FailureReason> {
        let id = job.id;
        // Approximate sizes are only hints; the stream itself is checked below.
        if let Some(estimate) = job.format.estimated_size.filter(|_| job.format.size_exact) {
            self.check_size(id, estimate)?;
        }

        self.storage.prepare(id).await.map_err(|e| {
            tracing::error!(job_id = id, "cannot prepare job dir: {:#}", e);
            FailureReason::Storage
        })?;

        let path = self.storage.final_path(id, &job.format.container);
        let mut size = self.fetch(job, &job.format.handle, &path, 0, abort).await?;

        let audio = match &job.format.audio {
            Some(track) => {
                let audio_path = self.storage.audio_path(id, &track.container);
                tracing::debug!(job_id = id, handle = %track.handle, "fetching audio companion");
                size += self.fetch(job, &track.handle, &audio_path, size, abort).await?;
                Some(audio_path)
            }
            None => None,
        };
        Ok(Downloaded { path, audio, size })
    }

    /// Streams `handle` into `final_path` and returns the bytes written.
    /// `already` counts bytes of earlier streams of the same job against the
    /// size ceiling.
    async fn fetch(
        &self,
        job: &Job,
        handle: &FormatHandle,
        final_path: &Path,
        already: u64,
        abort: &CancellationToken,
    ) -> Result<u64, FailureReason> {
        let id = job.id;
        let mut stream = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(FailureReason::Cancelled),
            _ = sleep_until(job.deadline) => return Err(FailureReason::TimedOut),
            opened = self.extractor.open_stream(&job.source, handle) => {
                opened.map_err(|e| upstream(id, e))?
            }
        };
        if let Some(declared) = stream.declared_size() {
            self.check_size(id, already + declared)?;
        }

        let mut writer = StorageWriter::create(&temp_path(final_path))
            .await
            .map_err(|e| storage(id, e))?;
        let mut buf = vec![0u8; READ_BUF];

        loop {
            let n = tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(FailureReason::Cancelled),
                _ = sleep_until(job.deadline) => return Err(FailureReason::TimedOut),
                read = stream.read_chunk(&mut buf) => read.map_err(|e| upstream(id, e.into()))?,
            };
            if n == 0 {
                break;
            }
            self.check_size(id, already + writer.written() + n as u64)?;
            writer.write(&buf[..n]).await.map_err(|e| storage(id, e))?;
        }
        drop(stream);

        writer.finalize(final_path).await.map_err(|e| storage(id, e))
    }
}

struct Downloaded {
    path: PathBuf,
    audio: Option<PathBuf>,
    size: u64,
}

fn upstream(id: JobId, e: ExtractError) -> FailureReason {
    tracing::warn!(job_id = id, "upstream error: {}", e);
    FailureReason::Upstream
}

fn storage(id: JobId, e: anyhow::Error) -> FailureReason {
    tracing::error!(job_id = id, "storage error: {:#}", e);
    FailureReason::Storage
}
