//! CLI for the vdq media download engine.

mod commands;
mod console;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use vdq_core::config;

use commands::{run_completions, run_config, run_fetch, run_formats, run_serve};

/// Top-level CLI for the vdq media download engine.
#[derive(Debug, Parser)]
#[command(name = "vdq")]
#[command(about = "vdq: bounded-concurrency media download engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Interactive console: paste links, pick formats, receive files.
    Serve {
        /// Directory that receives delivered files (default: current dir).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// List the downloadable formats of a link.
    Formats {
        /// Media link (YouTube watch, short or youtu.be URL).
        url: String,
    },

    /// Download one format of a link and exit.
    Fetch {
        /// Media link (YouTube watch, short or youtu.be URL).
        url: String,

        /// Quality label as shown by `vdq formats`, e.g. "720p" or "128kbps".
        #[arg(long, short = 'f', value_name = "LABEL")]
        format: String,

        /// Directory that receives the file (default: current dir).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Print the config file path and effective settings.
    Config,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // Completions must not create a config file as a side effect.
        if let CliCommand::Completions { shell } = cli.command {
            run_completions(shell);
            return Ok(());
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Serve { out } => run_serve(cfg, out_dir(out)?).await?,
            CliCommand::Formats { url } => run_formats(&cfg, &url).await?,
            CliCommand::Fetch { url, format, out } => {
                run_fetch(cfg, &url, &format, out_dir(out)?).await?
            }
            CliCommand::Config => run_config(&cfg)?,
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

fn out_dir(out: Option<PathBuf>) -> Result<PathBuf> {
    match out {
        Some(dir) => Ok(dir),
        None => Ok(std::env::current_dir()?),
    }
}

#[cfg(test)]
mod tests;
