use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "loadstack",
    about = "Keyed job stack: replay request traces through a worker pool",
    version,
    long_about = None
)]
pub struct Cli {
    /// Path to configuration file (overrides LOADSTACK_CONFIG_PATH env var)
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a request trace through the job stack and print a JSON report
    Replay {
        /// Trace file, one `<key|-> [low] [precache] [update-only]` request per line
        file: PathBuf,

        /// Simulated time spent on each job, in milliseconds
        #[arg(long, default_value_t = 0)]
        work_ms: u64,

        /// Start the workers before replaying instead of after admission
        #[arg(long)]
        live: bool,
    },

    /// Print the resolved configuration as JSON
    Config,
}
