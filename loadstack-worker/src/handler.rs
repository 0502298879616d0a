//! Job handler trait for plugging load logic into the worker pool.

use std::thread;
use std::time::Duration;

use loadstack_queue::{JobMetadata, JobRecord, JobSnapshot};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::WorkerError;

/// Trait for implementing job handlers.
///
/// A handler performs the actual load for a taken record. The pool marks the
/// record complete afterwards whatever the outcome, so a failed load never
/// pins its key.
pub trait JobHandler<M, L>: Send + Sync {
    /// Process one job.
    ///
    /// Returns `Ok(())` on success, or an error describing the failure.
    fn handle(&self, job: &JobRecord<M, L>) -> Result<(), WorkerError>;
}

impl<M, L, F> JobHandler<M, L> for F
where
    F: Fn(&JobRecord<M, L>) -> Result<(), WorkerError> + Send + Sync,
{
    fn handle(&self, job: &JobRecord<M, L>) -> Result<(), WorkerError> {
        self(job)
    }
}

/// A load handled by [`SimulatedLoader`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CompletedLoad {
    #[serde(flatten)]
    pub job: JobSnapshot,
    pub worker: Option<String>,
}

/// Handler that stands in for real loads: it sleeps for a fixed time and
/// records what it processed, in order.
///
/// Useful for replaying request traces and for tests.
#[derive(Debug, Default)]
pub struct SimulatedLoader {
    work: Duration,
    completed: Mutex<Vec<CompletedLoad>>,
}

impl SimulatedLoader {
    pub fn new(work: Duration) -> Self {
        Self {
            work,
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Loads processed so far, in completion order.
    pub fn completed(&self) -> Vec<CompletedLoad> {
        self.completed.lock().clone()
    }
}

impl<M: JobMetadata, L> JobHandler<M, L> for SimulatedLoader {
    fn handle(&self, job: &JobRecord<M, L>) -> Result<(), WorkerError> {
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        self.completed.lock().push(CompletedLoad {
            job: job.snapshot(),
            worker: thread::current().name().map(str::to_owned),
        });
        Ok(())
    }
}
