//! CLI command handlers, one per file.

mod completions;
mod config;
mod fetch;
mod formats;
mod serve;

pub use completions::run_completions;
pub use config::run_config;
pub use fetch::run_fetch;
pub use formats::run_formats;
pub use serve::run_serve;

use anyhow::Result;
use std::sync::Arc;
use vdq_core::config::VdqConfig;
use vdq_core::engine::{Collaborators, Engine};
use vdq_core::ffmpeg::FfmpegConverter;
use vdq_core::gateway::Gateway;
use vdq_core::ytdlp::YtDlpExtractor;

/// Engine wired to yt-dlp, ffmpeg and the given gateway.
fn build_engine(cfg: VdqConfig, gateway: Arc<dyn Gateway>) -> Result<Engine> {
    let download_root = cfg.resolved_download_dir()?;
    let collab = Collaborators {
        extractor: Arc::new(YtDlpExtractor::from_config(&cfg.extractor)),
        converter: Arc::new(FfmpegConverter::from_config(&cfg.converter)),
        gateway,
    };
    Ok(Engine::new(cfg, download_root, collab))
}
