//! Keyed job stack for load workers.
//!
//! This crate provides the admission structure that sits between the code
//! issuing resource loads and a small pool of worker threads. Requests for the
//! same resource are coalesced into one record carrying every interested
//! listener, normal-priority work is served ahead of prefetch work, and a
//! queued prefetch job is moved to the front when a normal request for the
//! same resource arrives.
//!
//! # Architecture
//!
//! - [`JobStack`] - Admission, coalescing, promotion, consumption and completion
//! - [`Backend`] - Blocking double-ended container, see [`BackendKind`]
//! - [`JobRecord`] - A queued or in-flight job with its listeners
//! - [`JobMetadata`] - Capability a job description exposes to the stack
//! - [`LoadRequest`] - Ready-made [`JobMetadata`] implementation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::thread;
//!
//! use loadstack_queue::{BackendKind, JobStack, LoadRequest};
//!
//! let stack: Arc<JobStack<LoadRequest, &'static str>> =
//!     Arc::new(JobStack::with_backend(BackendKind::Deque));
//!
//! let worker = {
//!     let stack = Arc::clone(&stack);
//!     thread::spawn(move || {
//!         while let Ok(job) = stack.take() {
//!             println!("loading {} for {:?}", job.key(), job.listeners());
//!             stack.mark_complete(&job);
//!         }
//!     })
//! };
//!
//! stack.put(LoadRequest::new("cover/1").low_priority(), "prefetch");
//! stack.put(LoadRequest::new("cover/2"), "grid");
//! // promotes cover/1 ahead of cover/2
//! stack.put(LoadRequest::new("cover/1"), "detail");
//!
//! stack.shutdown();
//! worker.join().unwrap();
//! ```

mod backend;
mod error;
mod stack;
mod types;

pub use backend::{Backend, BackendKind, DequeStrategy, HeapStrategy, QueueStrategy};
pub use error::{JobStackError, UnknownBackend};
pub use stack::{JobStack, StackStats};
pub use types::{JobMetadata, JobRecord, JobSnapshot, JobState, LoadRequest, Priority};
