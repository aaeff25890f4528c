//! `vdq config` – show where the config lives and what is in effect.

use anyhow::Result;
use vdq_core::config::{self, VdqConfig};

pub fn run_config(cfg: &VdqConfig) -> Result<()> {
    println!("config file:   {}", config::config_path()?.display());
    println!("download dir:  {}", cfg.resolved_download_dir()?.display());
    println!();
    println!("{:<22} {}", "max_concurrent_jobs", cfg.max_concurrent_jobs);
    println!(
        "{:<22} {}",
        "max_queued_jobs",
        cfg.max_queued_jobs
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    );
    println!("{:<22} {}s", "job_timeout", cfg.job_timeout_secs);
    println!("{:<22} {}", "max_file_size_bytes", cfg.max_file_size_bytes);
    println!("{:<22} {}s", "retention", cfg.retention_secs);
    println!("{:<22} {}s", "sweep_interval", cfg.sweep_interval_secs);
    println!("{:<22} {}ms", "throttle", cfg.throttle_ms);
    println!("{:<22} {}", "extractor", cfg.extractor.binary.display());
    println!(
        "{:<22} {} ({})",
        "converter",
        cfg.converter.binary.display(),
        cfg.converter.audio_bitrate
    );
    println!(
        "{:<22} standard {} / high {} / chunk {}",
        "transport",
        cfg.transport.standard_ceiling_bytes,
        optional(cfg.transport.high_ceiling_bytes),
        optional(cfg.transport.chunk_bytes)
    );
    Ok(())
}

fn optional(v: Option<u64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string())
}
