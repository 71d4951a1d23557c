//! CLI for the laneq job dispatcher.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use laneq_core::config;

use commands::{run_cleanup, run_demo, run_status};

/// Top-level CLI for the laneq job dispatcher.
#[derive(Debug, Parser)]
#[command(name = "laneq")]
#[command(about = "laneq: bounded-concurrency job dispatcher", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Show every job in the durable store.
    Status,

    /// Delete finished jobs older than the given age.
    Cleanup {
        /// Remove terminal rows completed more than this many days ago.
        #[arg(long, default_value = "7", value_name = "DAYS")]
        days: u64,
    },

    /// Run a local end-to-end demo: submit jobs against a throwaway store and
    /// complete them from a simulated external processor.
    Demo {
        /// Number of jobs to submit.
        #[arg(long, default_value = "12", value_name = "N")]
        jobs: usize,

        /// Lane count (defaults to the configured value).
        #[arg(long, value_name = "N")]
        lanes: Option<usize>,

        /// Per-lane concurrency cap (defaults to the configured value).
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Status => run_status().await?,
            CliCommand::Cleanup { days } => run_cleanup(days).await?,
            CliCommand::Demo {
                jobs,
                lanes,
                concurrency,
            } => {
                let lanes = lanes.unwrap_or(cfg.lanes);
                let concurrency = concurrency.unwrap_or(cfg.lane_concurrency);
                run_demo(&cfg, jobs, lanes, concurrency).await?;
            }
        }

        Ok(())
    }
}
