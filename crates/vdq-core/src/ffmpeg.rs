//! Media conversion through an ffmpeg subprocess.
//!
//! The process is a scoped resource: it is spawned with `kill_on_drop`, so
//! it is terminated on every exit path including timeout and cancellation
//! (dropping the conversion future drops the child).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::format::FormatKind;

/// Longest stderr excerpt kept in an error.
const STDERR_LIMIT: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input: PathBuf,
    /// Separate audio track muxed into a video-only input.
    pub audio: Option<PathBuf>,
    pub output: PathBuf,
    pub kind: FormatKind,
    /// Target container, e.g. "mp4" or "mp3".
    pub container: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("failed to spawn converter: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("converter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("conversion exceeded {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait MediaConverter: Send + Sync {
    /// Convert `req.input` into `req.output`, giving up after `timeout`.
    async fn convert(&self, req: &ConversionRequest, timeout: Duration)
        -> Result<(), ConversionError>;
}

pub struct FfmpegConverter {
    binary: PathBuf,
    audio_bitrate: String,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<PathBuf>, audio_bitrate: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            audio_bitrate: audio_bitrate.into(),
        }
    }

    pub fn from_config(cfg: &crate::config::ConverterConfig) -> Self {
        Self::new(cfg.binary.clone(), cfg.audio_bitrate.clone())
    }
}

/// Arguments for one conversion (everything after the binary name).
pub fn build_args(req: &ConversionRequest, audio_bitrate: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(path_arg(&req.input));
    match (req.kind, req.audio.as_deref(), req.container.as_str()) {
        (FormatKind::Video, Some(audio), container) => {
            args.push("-i".to_string());
            args.push(path_arg(audio));
            args.extend(["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a"].map(String::from));
            args.push(companion_codec(audio, container).to_string());
            args.extend(["-movflags", "+faststart"].map(String::from));
        }
        (FormatKind::Video, None, _) => {
            args.extend(["-c", "copy", "-movflags", "+faststart"].map(String::from));
        }
        (FormatKind::Audio, _, "mp3") => {
            args.extend(["-vn", "-acodec", "libmp3lame", "-b:a"].map(String::from));
            args.push(audio_bitrate.to_string());
        }
        (FormatKind::Audio, _, _) => {
            args.extend(["-vn", "-c:a", "copy"].map(String::from));
        }
    }
    args.push(path_arg(&req.output));
    args
}

/// Audio codec for a companion track: copied when the target container can
/// hold it as is, re-encoded otherwise.
fn companion_codec(audio: &Path, container: &str) -> &'static str {
    let ext = audio
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let fits = match container {
        "mp4" | "mov" => matches!(ext.as_str(), "m4a" | "mp4" | "aac"),
        "webm" => matches!(ext.as_str(), "webm" | "opus" | "ogg"),
        "mkv" => true,
        _ => false,
    };
    match (fits, container) {
        (true, _) => "copy",
        (false, "webm") => "libopus",
        (false, _) => "aac",
    }
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

#[async_trait]
impl MediaConverter for FfmpegConverter {
    async fn convert(
        &self,
        req: &ConversionRequest,
        timeout: Duration,
    ) -> Result<(), ConversionError> {
        let args = build_args(req, &self.audio_bitrate);
        tracing::debug!(binary = %self.binary.display(), ?args, "spawning converter");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ConversionError::Spawn)?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(out) => out.map_err(ConversionError::Spawn)?,
            Err(_) => {
                tracing::warn!(input = %req.input.display(), ?timeout, "conversion timed out");
                return Err(ConversionError::TimedOut(timeout));
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.len() > STDERR_LIMIT {
            let mut cut = STDERR_LIMIT;
            while !stderr.is_char_boundary(cut) {
                cut -= 1;
            }
            stderr.truncate(cut);
        }
        Err(ConversionError::Failed {
            status: output.status.to_string(),
            stderr,
        })
    }
}
