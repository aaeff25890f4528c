use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Extraction collaborator settings (optional `[extractor]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Path or name of the yt-dlp binary.
    pub binary: PathBuf,
    /// Upper bound for listing the streams of one source.
    pub list_timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            list_timeout_secs: 60,
        }
    }
}

/// Media-conversion collaborator settings (optional `[converter]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Path or name of the ffmpeg binary.
    pub binary: PathBuf,
    /// Upper bound for one conversion; the job deadline still applies.
    pub timeout_secs: u64,
    /// Bitrate passed to the MP3 encoder (e.g. "192k").
    pub audio_bitrate: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            timeout_secs: 600,
            audio_bitrate: "192k".to_string(),
        }
    }
}

/// Delivery ceilings of the outbound transport (optional `[transport]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Largest payload accepted by a single standard message.
    pub standard_ceiling_bytes: u64,
    /// Ceiling of the high-ceiling path (local API server); None = not available.
    #[serde(default)]
    pub high_ceiling_bytes: Option<u64>,
    /// Part size for chunked delivery; None = chunking not supported.
    #[serde(default)]
    pub chunk_bytes: Option<u64>,
    /// Container the transport expects for video.
    pub video_container: String,
    /// Container the transport expects for audio.
    pub audio_container: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            standard_ceiling_bytes: 50 * 1000 * 1000,
            high_ceiling_bytes: None,
            chunk_bytes: None,
            video_container: "mp4".to_string(),
            audio_container: "mp3".to_string(),
        }
    }
}

/// Global configuration loaded from `~/.config/vdq/config.toml`.
///
/// Read once at startup; the engine shares it read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdqConfig {
    /// Maximum number of jobs holding an admission ticket at once (N).
    pub max_concurrent_jobs: usize,
    /// Optional bound on the admission wait queue; None = unbounded.
    #[serde(default)]
    pub max_queued_jobs: Option<usize>,
    /// Per-job deadline measured from job creation.
    pub job_timeout_secs: u64,
    /// Largest file a worker will download.
    pub max_file_size_bytes: u64,
    /// How long cleaned-up jobs stay queryable before eviction.
    pub retention_secs: u64,
    /// Period of the background retention sweep.
    pub sweep_interval_secs: u64,
    /// Minimum interval between inbound events per requester (0 = off).
    #[serde(default)]
    pub throttle_ms: u64,
    /// Root for per-job temporary files; defaults to the XDG cache dir.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for VdqConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_queued_jobs: None,
            job_timeout_secs: 300,
            max_file_size_bytes: 2 * 1024 * 1024 * 1024,
            retention_secs: 600,
            sweep_interval_secs: 30,
            throttle_ms: 500,
            download_dir: None,
            extractor: ExtractorConfig::default(),
            converter: ConverterConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl VdqConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Directory holding per-job temp dirs: configured value or `~/.cache/vdq/downloads`.
    pub fn resolved_download_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("vdq")?;
        Ok(xdg_dirs.get_cache_home().join("downloads"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VdqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VdqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: VdqConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = VdqConfig::default();
        assert_eq!(cfg.max_concurrent_jobs, 2);
        assert_eq!(cfg.job_timeout_secs, 300);
        assert_eq!(cfg.max_file_size_bytes, 2 * 1024 * 1024 * 1024);
        assert!(cfg.max_queued_jobs.is_none());
        assert_eq!(cfg.transport.standard_ceiling_bytes, 50_000_000);
        assert!(cfg.transport.high_ceiling_bytes.is_none());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = VdqConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: VdqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_jobs, cfg.max_concurrent_jobs);
        assert_eq!(parsed.job_timeout_secs, cfg.job_timeout_secs);
        assert_eq!(parsed.converter.audio_bitrate, cfg.converter.audio_bitrate);
        assert_eq!(parsed.extractor.binary, cfg.extractor.binary);
    }

    #[test]
    fn config_toml_minimal_uses_section_defaults() {
        let toml = r#"
            max_concurrent_jobs = 4
            job_timeout_secs = 120
            max_file_size_bytes = 1_000_000
            retention_secs = 60
            sweep_interval_secs = 5
        "#;
        let cfg: VdqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_jobs, 4);
        assert_eq!(cfg.job_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.throttle_ms, 0);
        assert_eq!(cfg.extractor.binary, PathBuf::from("yt-dlp"));
        assert_eq!(cfg.transport.video_container, "mp4");
        assert!(cfg.download_dir.is_none());
    }

    #[test]
    fn config_toml_transport_and_queue() {
        let toml = r#"
            max_concurrent_jobs = 2
            max_queued_jobs = 10
            job_timeout_secs = 300
            max_file_size_bytes = 2_000_000_000
            retention_secs = 600
            sweep_interval_secs = 30
            download_dir = "/var/tmp/vdq"

            [transport]
            standard_ceiling_bytes = 50_000_000
            high_ceiling_bytes = 2_000_000_000
            chunk_bytes = 20_000_000
            video_container = "mp4"
            audio_container = "m4a"
        "#;
        let cfg: VdqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_queued_jobs, Some(10));
        assert_eq!(cfg.transport.high_ceiling_bytes, Some(2_000_000_000));
        assert_eq!(cfg.transport.chunk_bytes, Some(20_000_000));
        assert_eq!(cfg.transport.audio_container, "m4a");
        assert_eq!(
            cfg.resolved_download_dir().unwrap(),
            PathBuf::from("/var/tmp/vdq")
        );
    }
}
