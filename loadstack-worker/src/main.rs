//! loadstack
//!
//! Entry point for the trace replay tool: configuration loading, tracing
//! setup, worker pool startup and JSON reporting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use loadstack_config::{load_config, validate_config, Config};
use loadstack_queue::{BackendKind, JobStack, LoadRequest, StackStats};
use loadstack_worker::{
    parse_trace_file, replay, CompletedLoad, ReplaySummary, SimulatedLoader, WorkerPool,
};
use serde::Serialize;

mod cli;
mod tracing_setup;

use cli::{Cli, Command};
use tracing_setup::install_tracing_from_config;

/// How often the replay checks whether every admitted job completed.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Serialize)]
struct ReplayReport {
    summary: ReplaySummary,
    processed: usize,
    stats: StackStats,
    completed: Vec<CompletedLoad>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Resolve config path: CLI > environment variable
    let config_path = cli
        .config_path
        .or_else(|| std::env::var("LOADSTACK_CONFIG_PATH").ok().map(PathBuf::from));

    let config = load_config(config_path.as_deref())
        .with_context(|| format!("loading configuration from {:?}", config_path))?;
    validate_config(&config)?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Replay {
            file,
            work_ms,
            live,
        } => {
            install_tracing_from_config(&config.logging);
            let report = run_replay(&config, &file, Duration::from_millis(work_ms), live)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn run_replay(
    config: &Config,
    trace: &Path,
    work: Duration,
    live: bool,
) -> anyhow::Result<ReplayReport> {
    let requests =
        parse_trace_file(trace).with_context(|| format!("reading trace {}", trace.display()))?;
    let backend: BackendKind = config.queue.backend.parse()?;
    tracing::info!(
        backend = %backend,
        workers = config.workers.count,
        requests = requests.len(),
        "starting replay"
    );

    let stack = Arc::new(JobStack::<LoadRequest, usize>::with_backend(backend));
    let loader = Arc::new(SimulatedLoader::new(work));

    let (summary, pool) = if live {
        let pool = WorkerPool::spawn(Arc::clone(&stack), Arc::clone(&loader), &config.workers)?;
        (replay(&stack, requests), pool)
    } else {
        let summary = replay(&stack, requests);
        let pool = WorkerPool::spawn(Arc::clone(&stack), Arc::clone(&loader), &config.workers)?;
        (summary, pool)
    };

    while stack.task_count() > 0 {
        thread::sleep(IDLE_POLL_INTERVAL);
    }
    let stats = stack.stats();
    let processed = pool.shutdown()?;

    Ok(ReplayReport {
        summary,
        processed,
        stats,
        completed: loader.completed(),
    })
}
