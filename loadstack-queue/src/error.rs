//! Error types for the job stack.

use thiserror::Error;

/// Errors that may occur while interacting with the job stack.
///
/// Admission never fails: `put` reports "nothing admitted" through `None`.
/// The only failure a caller can observe is a consumer wait that ended
/// without producing a record.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JobStackError {
    #[error("wait for the next job was abandoned because the stack was shut down")]
    WaitAbandoned,
}

/// Returned when a backend name cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown backend kind: {0} (expected \"deque\" or \"heap\")")]
pub struct UnknownBackend(pub String);
