//! `vdq fetch <url> --format <label>` – one job through the full engine.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use vdq_core::config::VdqConfig;
use vdq_core::delivery::TransportProfile;
use vdq_core::format::FormatOption;
use vdq_core::registry::JobState;

use super::build_engine;
use crate::cli::console::{ConsoleGateway, CONSOLE_KEY};

pub async fn run_fetch(mut cfg: VdqConfig, url: &str, label: &str, out: PathBuf) -> Result<()> {
    // Two back-to-back events from one requester are expected here.
    cfg.throttle_ms = 0;
    let profile = TransportProfile::from(&cfg.transport);
    let gateway = Arc::new(ConsoleGateway::new(out, profile).quiet());
    let engine = build_engine(cfg, gateway)?;

    let options = engine
        .on_media_link(CONSOLE_KEY, url)
        .await
        .with_context(|| format!("resolve {url}"))?;
    let Some(option) = choose(&options, label) else {
        let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
        bail!("no format labelled {label:?}; available: {}", labels.join(", "));
    };
    tracing::info!(label = %option.label, container = %option.container, "fetching");

    let id = engine.on_format_chosen(CONSOLE_KEY, &option.handle).await?;
    let job = engine
        .wait_for_cleanup(id)
        .await
        .context("job vanished before cleanup")?;

    match job.outcome {
        Some(JobState::Delivered) => Ok(()),
        Some(JobState::Failed(reason)) => bail!("job {id} failed: {reason}"),
        Some(JobState::Cancelled) => bail!("job {id} cancelled"),
        other => bail!("job {id} ended without an outcome ({other:?})"),
    }
}

/// First option whose label matches, ignoring case.
pub(crate) fn choose<'a>(options: &'a [FormatOption], label: &str) -> Option<&'a FormatOption> {
    options
        .iter()
        .find(|o| o.label.eq_ignore_ascii_case(label.trim()))
}
