//! Request traces: a line-oriented description of load requests that can be
//! replayed through a [`JobStack`].
//!
//! ```text
//! # key        flags
//! cover/17
//! cover/18     low precache
//! -            low            <- no dedup key, never admitted
//! cover/18                    <- promotes the queued low-priority job
//! lyrics/3     update-only
//! ```

use std::fs;
use std::path::Path;

use loadstack_queue::{JobStack, LoadRequest};
use serde::Serialize;
use tracing::info;

use crate::error::TraceError;

/// Marker for a request without a dedup key.
const NO_KEY: &str = "-";

/// Parse one trace line. Blank lines and `#` comments yield `None`.
pub fn parse_trace_line(line_no: usize, line: &str) -> Result<Option<LoadRequest>, TraceError> {
    let line = line.split('#').next().unwrap_or_default().trim();
    let mut tokens = line.split_whitespace();
    let Some(key) = tokens.next() else {
        return Ok(None);
    };

    let mut request = if key == NO_KEY {
        LoadRequest::unkeyed()
    } else {
        LoadRequest::new(key)
    };
    for flag in tokens {
        request = match flag.to_ascii_lowercase().as_str() {
            "low" => request.low_priority(),
            "precache" => request.precache(),
            "update-only" | "update_only" => request.update_only(),
            _ => {
                return Err(TraceError::UnknownFlag {
                    line: line_no,
                    flag: flag.to_string(),
                })
            }
        };
    }
    Ok(Some(request))
}

/// Parse a whole trace, pairing each request with its 1-based line number.
pub fn parse_trace(input: &str) -> Result<Vec<(usize, LoadRequest)>, TraceError> {
    let mut requests = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        if let Some(request) = parse_trace_line(idx + 1, line)? {
            requests.push((idx + 1, request));
        }
    }
    Ok(requests)
}

pub fn parse_trace_file<P: AsRef<Path>>(path: P) -> Result<Vec<(usize, LoadRequest)>, TraceError> {
    parse_trace(&fs::read_to_string(path)?)
}

/// Admission outcome of a replayed trace.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReplaySummary {
    pub submitted: usize,
    /// Requests that created a new job.
    pub admitted: usize,
    /// Requests attached to an existing job.
    pub coalesced: usize,
    /// Requests without a key, or update-only requests with nothing to update.
    pub dropped: usize,
}

/// Put every request on `stack`, using its line number as listener.
///
/// Assumes the replay is the only producer while it runs.
pub fn replay<I>(stack: &JobStack<LoadRequest, usize>, requests: I) -> ReplaySummary
where
    I: IntoIterator<Item = (usize, LoadRequest)>,
{
    let mut summary = ReplaySummary::default();
    for (line, request) in requests {
        summary.submitted += 1;
        match stack.put(request, line) {
            None => summary.dropped += 1,
            Some(record) if record.listener_count() == 1 => summary.admitted += 1,
            Some(_) => summary.coalesced += 1,
        }
    }
    info!(
        submitted = summary.submitted,
        admitted = summary.admitted,
        coalesced = summary.coalesced,
        dropped = summary.dropped,
        "trace replayed"
    );
    summary
}
