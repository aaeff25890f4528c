//! Per-job disk area and file lifecycle.
//!
//! Every job downloads into its own directory under the download root:
//! `<root>/job-<id>/<id>.<container>`. Data is streamed into a `.part` file
//! and renamed into place once complete, so a finished name never refers to
//! a partial file. Cleanup removes the whole job directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::registry::JobId;

/// Temporary file suffix used before the final rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `7.mp4` → `7.mp4.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Download root shared by all jobs.
#[derive(Debug, Clone)]
pub struct JobStorage {
    root: PathBuf,
}

impl JobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, id: JobId) -> PathBuf {
        self.root.join(format!("job-{id}"))
    }

    /// Final location of the downloaded file for job `id`.
    pub fn final_path(&self, id: JobId, container: &str) -> PathBuf {
        self.job_dir(id).join(format!("{id}.{container}"))
    }

    /// Location of the separately downloaded audio companion of job `id`.
    pub fn audio_path(&self, id: JobId, container: &str) -> PathBuf {
        self.job_dir(id).join(format!("{id}.audio.{container}"))
    }

    /// Create (or recreate empty) the job directory.
    pub async fn prepare(&self, id: JobId) -> Result<PathBuf> {
        let dir = self.job_dir(id);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("failed to clear stale job dir: {}", dir.display()))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create job dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Remove everything stored for job `id`. Returns whether anything existed.
    /// A missing directory is not an error: cleanup may run more than once.
    pub async fn remove_job(&self, id: JobId) -> Result<bool> {
        let dir = self.job_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(job_id = id, dir = %dir.display(), "removed job dir");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", dir.display())),
        }
    }

    /// Ids of job directories currently on disk.
    pub async fn list_job_dirs(&self) -> Result<Vec<JobId>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.root.display()))
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix("job-"))
                .and_then(|n| n.parse().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Sequential writer for a `.part` file.
pub struct StorageWriter {
    file: File,
    temp_path: PathBuf,
    written: u64,
}

impl StorageWriter {
    /// Create a new temp file at `temp_path`. Overwrites if the path already exists.
    pub async fn create(temp_path: &Path) -> Result<Self> {
        let file = File::create(temp_path)
            .await
            .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
        Ok(Self {
            file,
            temp_path: temp_path.to_path_buf(),
            written: 0,
        })
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .await
            .context("storage write failed")?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flush, sync and rename the temp file to `final_path`. Returns the size.
    pub async fn finalize(mut self, final_path: &Path) -> Result<u64> {
        self.file.flush().await.context("storage flush failed")?;
        self.file.sync_all().await.context("storage sync failed")?;
        drop(self.file);
        tokio::fs::rename(&self.temp_path, final_path)
            .await
            .with_context(|| {
                format!(
                    "failed to rename {} to {}",
                    self.temp_path.display(),
                    final_path.display()
                )
            })?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_appends_part() {
        let p = temp_path(Path::new("7.mp4"));
        assert_eq!(p.to_string_lossy(), "7.mp4.part");
        let p2 = temp_path(Path::new("/tmp/job-3/3.m4a"));
        assert_eq!(p2.to_string_lossy(), "/tmp/job-3/3.m4a.part");
    }

    #[test]
    fn job_layout() {
        let s = JobStorage::new("/data");
        assert_eq!(s.job_dir(4), Path::new("/data/job-4"));
        assert_eq!(s.final_path(4, "mp4"), Path::new("/data/job-4/4.mp4"));
        assert_eq!(s.audio_path(4, "webm"), Path::new("/data/job-4/4.audio.webm"));
    }

    #[tokio::test]
    async fn write_finalize_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JobStorage::new(dir.path());
        storage.prepare(9).await.unwrap();
        let final_path = storage.final_path(9, "mp4");
        let tp = temp_path(&final_path);

        let mut writer = StorageWriter::create(&tp).await.unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        assert_eq!(writer.written(), 11);
        assert_eq!(writer.finalize(&final_path).await.unwrap(), 11);

        assert!(!tp.exists());
        assert_eq!(std::fs::read(&final_path).unwrap(), b"hello world");
        assert_eq!(storage.list_job_dirs().await.unwrap(), vec![9]);

        assert!(storage.remove_job(9).await.unwrap());
        assert!(!storage.job_dir(9).exists());
        assert!(!storage.remove_job(9).await.unwrap());
        assert!(storage.list_job_dirs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prepare_clears_stale_contents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JobStorage::new(dir.path());
        let job_dir = storage.prepare(1).await.unwrap();
        std::fs::write(job_dir.join("leftover"), b"x").unwrap();
        storage.prepare(1).await.unwrap();
        assert!(!job_dir.join("leftover").exists());
    }
}
