//! Error types for the worker pool and trace replay.

use thiserror::Error;

/// Errors that may occur while running workers.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("job handler failed: {0}")]
    Handler(String),

    #[error("worker thread {0} panicked")]
    WorkerPanicked(String),
}

/// Errors raised while reading a request trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: unknown flag {flag:?}")]
    UnknownFlag { line: usize, flag: String },
}
