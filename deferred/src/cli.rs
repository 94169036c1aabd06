//! CLI argument parsing for deferred

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "deferred")]
#[command(author, version, about = "Run deferred tasks on a heap scheduler or a delay queue", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Schedule the configured jobs and print each firing
    Run {
        /// How long to let the scheduler run before shutting it down
        #[arg(short, long, default_value = "1000")]
        duration_ms: u64,
    },

    /// Drain a preloaded delay queue with competing consumers
    Race {
        /// Number of consumer threads
        #[arg(short, long, default_value = "4")]
        consumers: usize,

        /// Number of items to preload
        #[arg(short, long, default_value = "20")]
        items: usize,

        /// Gap between consecutive item deadlines
        #[arg(short, long, default_value = "5")]
        spacing_ms: u64,
    },

    /// Print the effective configuration as YAML
    Config,
}
