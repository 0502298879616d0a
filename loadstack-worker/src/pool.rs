//! Fixed pool of consumer threads draining a [`JobStack`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use loadstack_config::WorkerConfig;
use loadstack_queue::{JobMetadata, JobStack};
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::handler::JobHandler;

/// Named OS threads, each looping `take` -> handle -> `mark_complete`.
///
/// Workers stop when the stack is shut down. Dropping the pool shuts the
/// stack down and joins the workers.
pub struct WorkerPool<M: JobMetadata, L: Send + 'static> {
    stack: Arc<JobStack<M, L>>,
    workers: Vec<(String, JoinHandle<()>)>,
    processed: Arc<AtomicUsize>,
    stopped: bool,
}

impl<M: JobMetadata, L: Send + 'static> fmt::Debug for WorkerPool<M, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("processed", &self.processed())
            .finish()
    }
}

impl<M: JobMetadata, L: Send + 'static> WorkerPool<M, L> {
    /// Start `config.count` workers named `{config.thread_name}-{n}`.
    ///
    /// If a thread cannot be spawned, the stack is shut down, the workers
    /// already started are joined and the spawn error is returned.
    pub fn spawn<H>(
        stack: Arc<JobStack<M, L>>,
        handler: Arc<H>,
        config: &WorkerConfig,
    ) -> Result<Self, WorkerError>
    where
        H: JobHandler<M, L> + 'static,
    {
        let mut pool = Self {
            stack,
            workers: Vec::with_capacity(config.count),
            processed: Arc::new(AtomicUsize::new(0)),
            stopped: false,
        };

        for n in 0..config.count {
            let name = format!("{}-{}", config.thread_name, n);
            let stack = Arc::clone(&pool.stack);
            let handler = Arc::clone(&handler);
            let processed = Arc::clone(&pool.processed);
            let worker_name = name.clone();
            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                run_worker(&worker_name, &stack, handler.as_ref(), &processed);
            });
            match spawned {
                Ok(handle) => pool.workers.push((name, handle)),
                Err(e) => {
                    error!(worker = %name, error = %e, "failed to spawn worker");
                    // Drop joins what was started.
                    return Err(WorkerError::Spawn(e));
                }
            }
        }

        info!(
            workers = pool.workers.len(),
            backend = %pool.stack.backend_kind(),
            "worker pool started"
        );
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs handled so far, failed ones included.
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Shut the stack down, join every worker and return how many jobs were
    /// processed.
    pub fn shutdown(mut self) -> Result<usize, WorkerError> {
        self.stop()?;
        Ok(self.processed())
    }

    fn stop(&mut self) -> Result<(), WorkerError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.stack.shutdown();
        let mut result = Ok(());
        for (name, handle) in self.workers.drain(..) {
            if handle.join().is_err() {
                error!(worker = %name, "worker thread panicked");
                result = Err(WorkerError::WorkerPanicked(name));
            }
        }
        info!(processed = self.processed(), "worker pool stopped");
        result
    }
}

impl<M: JobMetadata, L: Send + 'static> Drop for WorkerPool<M, L> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run_worker<M, L, H>(name: &str, stack: &JobStack<M, L>, handler: &H, processed: &AtomicUsize)
where
    M: JobMetadata,
    L: Send + 'static,
    H: JobHandler<M, L> + ?Sized,
{
    debug!(worker = name, "worker started");
    while let Ok(job) = stack.take() {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&job)));
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(Ok(())) => debug!(
                worker = name,
                key = %job.key(),
                listeners = job.listener_count(),
                elapsed_ms,
                "job finished"
            ),
            Ok(Err(e)) => warn!(worker = name, key = %job.key(), error = %e, "job failed"),
            Err(_) => error!(worker = name, key = %job.key(), "job handler panicked"),
        }
        stack.mark_complete(&job);
        processed.fetch_add(1, Ordering::Relaxed);
    }
    debug!(worker = name, "worker stopped");
}
