//! Consumers for the loadstack job stack.
//!
//! This crate provides the worker side of the system: a fixed pool of named
//! threads that drain a [`JobStack`](loadstack_queue::JobStack), the
//! [`JobHandler`] seam where real load logic plugs in, and request-trace
//! replay used by the `loadstack` tool.
//!
//! # Architecture
//!
//! - [`WorkerPool`] - Threads looping `take` -> [`JobHandler::handle`] -> `mark_complete`
//! - [`JobHandler`] - Trait for implementing load handlers
//! - [`SimulatedLoader`] - Handler that sleeps and records what it processed
//! - [`replay`] - Feed a parsed request trace into a stack
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use loadstack_config::WorkerConfig;
//! use loadstack_queue::{JobRecord, JobStack, LoadRequest};
//! use loadstack_worker::{WorkerError, WorkerPool};
//!
//! let stack = Arc::new(JobStack::<LoadRequest, u64>::new());
//! let handler = Arc::new(|job: &JobRecord<LoadRequest, u64>| -> Result<(), WorkerError> {
//!     println!("loading {}", job.key());
//!     Ok(())
//! });
//! let pool = WorkerPool::spawn(Arc::clone(&stack), handler, &WorkerConfig::default()).unwrap();
//!
//! stack.put(LoadRequest::new("cover/1"), 1);
//!
//! let processed = pool.shutdown().unwrap();
//! println!("processed {processed} jobs");
//! ```

mod error;
mod handler;
mod pool;
mod trace;

pub use error::{TraceError, WorkerError};
pub use handler::{CompletedLoad, JobHandler, SimulatedLoader};
pub use pool::WorkerPool;
pub use trace::{parse_trace, parse_trace_file, parse_trace_line, replay, ReplaySummary};
