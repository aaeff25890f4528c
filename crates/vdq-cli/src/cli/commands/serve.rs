//! `vdq serve` – interactive console gateway over stdin/stdout.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use vdq_core::config::VdqConfig;
use vdq_core::delivery::TransportProfile;
use vdq_core::engine::{CancelOutcome, Engine};
use vdq_core::format::FormatOption;

use super::build_engine;
use crate::cli::console::{ConsoleGateway, CONSOLE_KEY};

/// One line typed at the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsoleInput {
    Empty,
    /// 1-based index into the last offered list.
    Choose(usize),
    Cancel,
    Jobs,
    Quit,
    Link(String),
}

pub(crate) fn parse_line(line: &str) -> ConsoleInput {
    let line = line.trim();
    match line {
        "" => ConsoleInput::Empty,
        "cancel" | "/cancel" => ConsoleInput::Cancel,
        "jobs" => ConsoleInput::Jobs,
        "quit" | "exit" => ConsoleInput::Quit,
        _ => match line.parse::<usize>() {
            Ok(n) => ConsoleInput::Choose(n),
            Err(_) => ConsoleInput::Link(line.to_string()),
        },
    }
}

pub async fn run_serve(cfg: VdqConfig, out: PathBuf) -> Result<()> {
    let profile = TransportProfile::from(&cfg.transport);
    let gateway = Arc::new(ConsoleGateway::new(out, profile));
    println!("Delivering files into {}", gateway.out_dir().display());
    let engine = build_engine(cfg, gateway)?;
    let sweeper = engine.spawn_sweeper();

    println!("Paste a link, pick a format by number, `cancel`, `jobs` or `quit`.");
    let mut offered: Vec<FormatOption> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            ConsoleInput::Empty => {}
            ConsoleInput::Quit => break,
            ConsoleInput::Jobs => print_jobs(&engine),
            ConsoleInput::Cancel => {
                if engine.on_cancel(CONSOLE_KEY).await == CancelOutcome::Nothing {
                    println!("Nothing to cancel.");
                }
            }
            ConsoleInput::Link(text) => match engine.on_media_link(CONSOLE_KEY, &text).await {
                Ok(options) => offered = options,
                Err(e) => tracing::debug!("link not accepted: {}", e),
            },
            ConsoleInput::Choose(n) => {
                let Some(option) = n.checked_sub(1).and_then(|i| offered.get(i)) else {
                    println!("No format number {n}. Send a link first.");
                    continue;
                };
                match engine.on_format_chosen(CONSOLE_KEY, &option.handle).await {
                    Ok(id) => tracing::info!(job_id = id, label = %option.label, "job started"),
                    Err(e) => tracing::debug!("choice not accepted: {}", e),
                }
            }
        }
    }

    // Let running jobs finish before exiting.
    let pending: Vec<_> = engine
        .jobs()
        .into_iter()
        .filter(|j| j.state.is_pending())
        .map(|j| j.id)
        .collect();
    if !pending.is_empty() {
        println!("Waiting for {} job(s)...", pending.len());
    }
    for id in pending {
        engine.wait_for_cleanup(id).await;
    }
    engine.shutdown();
    sweeper.abort();
    Ok(())
}

fn print_jobs(engine: &Engine) {
    let jobs = engine.jobs();
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }
    println!("{:<6} {:<12} {:<10} {:<10} {}", "ID", "STATE", "FORMAT", "SIZE", "SOURCE");
    for j in jobs {
        // Finished jobs show how they ended.
        let state = j.outcome.unwrap_or(j.state).as_str();
        let size = j
            .size_bytes
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<12} {:<10} {:<10} {}",
            j.id, state, j.format.label, size, j.source
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_lines() {
        assert_eq!(parse_line("   "), ConsoleInput::Empty);
        assert_eq!(parse_line("2"), ConsoleInput::Choose(2));
        assert_eq!(parse_line(" cancel "), ConsoleInput::Cancel);
        assert_eq!(parse_line("/cancel"), ConsoleInput::Cancel);
        assert_eq!(parse_line("jobs"), ConsoleInput::Jobs);
        assert_eq!(parse_line("quit"), ConsoleInput::Quit);
        assert_eq!(
            parse_line("https://youtu.be/dQw4w9WgXcQ"),
            ConsoleInput::Link("https://youtu.be/dQw4w9WgXcQ".into())
        );
        assert_eq!(parse_line("-1"), ConsoleInput::Link("-1".into()));
    }
}
