//! Extraction through the yt-dlp command-line tool.
//!
//! `list_streams` runs `yt-dlp -J` and maps `formats[]` to raw streams.
//! `open_stream` runs `yt-dlp -f <id> -o -` and reads the media from stdout.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

use crate::extractor::{ExtractError, Extractor, MediaStream, RawStream};
use crate::format::FormatHandle;
use crate::media::MediaSource;

/// Subset of `yt-dlp -J` output we use.
#[derive(Debug, Deserialize)]
pub struct InfoJson {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatJson>,
}

#[derive(Debug, Deserialize)]
pub struct FormatJson {
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<f64>,
}

fn codec_present(codec: &Option<String>) -> Option<bool> {
    codec.as_deref().map(|c| c != "none")
}

impl FormatJson {
    fn into_raw(self) -> RawStream {
        let has_video = codec_present(&self.vcodec).unwrap_or(self.height.is_some());
        let has_audio = codec_present(&self.acodec).unwrap_or(!has_video && self.abr.is_some());
        let audio_kbps = if has_audio {
            self.abr
                .or(if has_video { None } else { self.tbr })
                .map(|k| k.round() as u32)
        } else {
            None
        };
        let size = self
            .filesize
            .or(self.filesize_approx.filter(|s| *s > 0.0).map(|s| s as u64));
        RawStream {
            format_id: self.format_id,
            container: self.ext.unwrap_or_else(|| "bin".to_string()),
            has_video,
            has_audio,
            height: if has_video { self.height } else { None },
            audio_kbps,
            size,
            size_exact: self.filesize.is_some(),
        }
    }
}

/// Parses `yt-dlp -J` output into raw streams.
pub fn parse_info(json: &[u8]) -> Result<Vec<RawStream>, ExtractError> {
    let info: InfoJson = serde_json::from_slice(json)
        .map_err(|e| ExtractError::Upstream(format!("invalid yt-dlp json: {e}")))?;
    if info.formats.is_empty() {
        return Err(ExtractError::NotFound(format!(
            "{} has no formats",
            info.id.as_deref().unwrap_or("source")
        )));
    }
    tracing::debug!(id = ?info.id, title = ?info.title, formats = info.formats.len(), "yt-dlp info");
    Ok(info.formats.into_iter().map(FormatJson::into_raw).collect())
}

/// Maps a failed yt-dlp run to an extraction error using its stderr.
pub fn classify_stderr(stderr: &str) -> ExtractError {
    let line = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().last())
        .unwrap_or("yt-dlp failed")
        .trim()
        .to_string();
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("unsupported url") {
        ExtractError::Unsupported(line)
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("is not available")
        || lower.contains("has been removed")
    {
        ExtractError::NotFound(line)
    } else {
        ExtractError::Upstream(line)
    }
}

pub struct YtDlpExtractor {
    binary: PathBuf,
    list_timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<PathBuf>, list_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            list_timeout,
        }
    }

    pub fn from_config(cfg: &crate::config::ExtractorConfig) -> Self {
        Self::new(cfg.binary.clone(), Duration::from_secs(cfg.list_timeout_secs))
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn list_streams(&self, source: &MediaSource) -> Result<Vec<RawStream>, ExtractError> {
        let child = Command::new(&self.binary)
            .args(["-J", "--no-warnings", "--no-playlist"])
            .arg(source.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.list_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ExtractError::Upstream(format!("yt-dlp timed out after {:?}", self.list_timeout))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(source = %source, status = %output.status, "yt-dlp listing failed");
            return Err(classify_stderr(&stderr));
        }
        parse_info(&output.stdout)
    }

    async fn open_stream(
        &self,
        source: &MediaSource,
        handle: &FormatHandle,
    ) -> Result<Box<dyn MediaStream>, ExtractError> {
        let mut child = Command::new(&self.binary)
            .args(["--no-warnings", "--no-playlist", "--no-part", "-q", "-f"])
            .arg(handle.as_str())
            .args(["-o", "-"])
            .arg(source.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Upstream("yt-dlp stdout unavailable".into()))?;
        tracing::debug!(source = %source, format = %handle, "yt-dlp stream opened");
        Ok(Box::new(YtDlpStream {
            child,
            stdout,
            finished: false,
        }))
    }
}

/// Stdout of a running `yt-dlp -o -`. The process dies with the stream.
struct YtDlpStream {
    child: Child,
    stdout: ChildStdout,
    finished: bool,
}

#[async_trait]
impl MediaStream for YtDlpStream {
    fn declared_size(&self) -> Option<u64> {
        None
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished {
            return Ok(0);
        }
        let n = self.stdout.read(buf).await?;
        if n == 0 {
            self.finished = true;
            let status = self.child.wait().await?;
            if !status.success() {
                return Err(io::Error::other(format!("yt-dlp exited with {status}")));
            }
        }
        Ok(n)
    }
}
