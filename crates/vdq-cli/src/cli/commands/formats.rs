//! `vdq formats <url>` – resolve a link and print its ordered formats.

use anyhow::{Context, Result};
use vdq_core::config::VdqConfig;
use vdq_core::format;
use vdq_core::media::MediaSource;
use vdq_core::ytdlp::YtDlpExtractor;

use crate::cli::console::format_options;

pub async fn run_formats(cfg: &VdqConfig, url: &str) -> Result<()> {
    let source = MediaSource::parse(url)?;
    let extractor = YtDlpExtractor::from_config(&cfg.extractor);
    let options = format::resolve(&extractor, &source)
        .await
        .with_context(|| format!("resolve {}", source))?;
    print!("{}", format_options(&source, &options));
    Ok(())
}
