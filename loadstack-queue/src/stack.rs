//! The keyed job stack.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::backend::{Backend, BackendKind};
use crate::error::JobStackError;
use crate::types::{JobMetadata, JobRecord, JobState};

/// Mapping from dedup key to the single live record for that key.
///
/// Not synchronized itself; [`JobStack`] keeps it behind the lock that also
/// serializes admission.
struct KeyIndex<M, L> {
    records: HashMap<String, Arc<JobRecord<M, L>>>,
}

impl<M, L> Default for KeyIndex<M, L> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<M, L> KeyIndex<M, L> {
    #[inline]
    fn lookup(&self, key: &str) -> Option<&Arc<JobRecord<M, L>>> {
        self.records.get(key)
    }

    #[inline]
    fn insert(&mut self, record: Arc<JobRecord<M, L>>) {
        self.records.insert(record.key().to_owned(), record);
    }

    /// Remove `key` only while it still points at `record`.
    fn remove_record(&mut self, record: &JobRecord<M, L>) -> bool {
        match self.records.get(record.key()) {
            Some(current) if current.id() == record.id() => {
                self.records.remove(record.key());
                true
            }
            _ => false,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.records.len()
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

/// Point-in-time counters of a [`JobStack`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StackStats {
    pub backend: BackendKind,
    /// Records admitted and not yet completed (queued + taken).
    pub task_count: usize,
    /// Records still waiting in the backend.
    pub remaining_count: usize,
}

/// A double-ended stack of keyed jobs.
///
/// Normal-priority jobs go on top and are served first; low-priority jobs go
/// to the bottom. Requests for a key that is already admitted are coalesced
/// onto the existing record, and a normal request for a queued low-priority
/// record moves it to the top.
///
/// Producers call [`put`](Self::put), consumers loop over
/// [`take`](Self::take) and [`mark_complete`](Self::mark_complete).
pub struct JobStack<M, L> {
    index: Mutex<KeyIndex<M, L>>,
    backend: Backend<M, L>,
}

impl<M, L> fmt::Debug for JobStack<M, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStack")
            .field("index", &"<Mutex<KeyIndex>>")
            .field("backend", &self.backend)
            .finish()
    }
}

impl<M: JobMetadata, L: Send + 'static> Default for JobStack<M, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: JobMetadata, L: Send + 'static> JobStack<M, L> {
    /// A stack backed by a double-ended queue.
    pub fn new() -> Self {
        Self::with_backend(BackendKind::Deque)
    }

    pub fn with_backend(kind: BackendKind) -> Self {
        Self {
            index: Mutex::new(KeyIndex::default()),
            backend: Backend::new(kind),
        }
    }

    #[inline]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Admit a job request.
    ///
    /// Returns the record the listener was registered on, or `None` when the
    /// request was not admitted: it has no dedup key, or it is update-only
    /// and no job for its key exists.
    pub fn put(&self, metadata: M, listener: L) -> Option<Arc<JobRecord<M, L>>> {
        let Some(key) = metadata.key().map(str::to_owned) else {
            debug!("dropping job request without a dedup key");
            return None;
        };

        let mut index = self.index.lock();

        if let Some(existing) = index.lookup(&key) {
            let record = Arc::clone(existing);
            record.add_listener(listener);
            if !metadata.is_precache_request() {
                record.with_metadata_mut(|m| m.set_precache_request(false));
            }
            if !metadata.is_low_priority() {
                record.with_metadata_mut(|m| m.set_low_priority(false));
                if self.backend.remove(&record) {
                    record.set_state(JobState::Promoted);
                    self.backend.add_first(Arc::clone(&record));
                    debug!(key = %key, "promoted queued job to the front");
                } else {
                    trace!(key = %key, "job already taken, promotion skipped");
                }
            }
            debug!(
                key = %key,
                listeners = record.listener_count(),
                "coalesced job request onto existing record"
            );
            return Some(record);
        }

        if metadata.is_update_only() {
            debug!(key = %key, "update-only request has no job to update");
            return None;
        }

        let low_priority = metadata.is_low_priority();
        let record = Arc::new(JobRecord::new(key.clone(), metadata, listener));
        index.insert(Arc::clone(&record));
        if low_priority {
            self.backend.add_last(Arc::clone(&record));
        } else {
            self.backend.add_first(Arc::clone(&record));
        }
        debug!(key = %key, low_priority, "admitted new job");
        Some(record)
    }

    /// Block until the next job is available.
    ///
    /// Fails with [`JobStackError::WaitAbandoned`] once the stack is shut down.
    pub fn take(&self) -> Result<Arc<JobRecord<M, L>>, JobStackError> {
        let record = self.backend.take()?;
        record.mark_taken();
        Ok(record)
    }

    /// Like [`take`](Self::take), returning `Ok(None)` after `timeout`.
    pub fn take_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Arc<JobRecord<M, L>>>, JobStackError> {
        let record = self.backend.take_timeout(timeout)?;
        if let Some(record) = &record {
            record.mark_taken();
        }
        Ok(record)
    }

    /// Take the next job if one is queued.
    pub fn try_take(&self) -> Option<Arc<JobRecord<M, L>>> {
        let record = self.backend.try_take()?;
        record.mark_taken();
        Some(record)
    }

    /// Async counterpart of [`take`](Self::take).
    pub async fn take_async(&self) -> Result<Arc<JobRecord<M, L>>, JobStackError> {
        let record = self.backend.take_async().await?;
        record.mark_taken();
        Ok(record)
    }

    /// Release the key of a finished job so new requests for it create a new
    /// record.
    ///
    /// Returns whether the key was released. Completing a record twice, or a
    /// record whose key was already reassigned after
    /// [`clear_stack`](Self::clear_stack), leaves the index untouched.
    pub fn mark_complete(&self, record: &JobRecord<M, L>) -> bool {
        let removed = self.index.lock().remove_record(record);
        record.set_state(JobState::Complete);
        trace!(key = %record.key(), removed, "job marked complete");
        removed
    }

    /// Whether no job is waiting to be taken.
    pub fn is_empty(&self) -> bool {
        let _index = self.index.lock();
        self.backend.is_empty()
    }

    /// Drop every queued job and forget every admitted key.
    ///
    /// The two halves are cleared one after the other; this is a reset, not
    /// something to race against steady-state traffic.
    pub fn clear_stack(&self) {
        let discarded = self.backend.clear();
        self.index.lock().clear();
        debug!(discarded, "job stack cleared");
    }

    /// Number of admitted jobs that have not been completed yet.
    pub fn task_count(&self) -> usize {
        self.index.lock().len()
    }

    /// Number of jobs waiting to be taken.
    pub fn remaining_count(&self) -> usize {
        self.backend.size()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.lock().lookup(key).is_some()
    }

    /// The live record for `key`, queued or taken.
    pub fn get(&self, key: &str) -> Option<Arc<JobRecord<M, L>>> {
        self.index.lock().lookup(key).cloned()
    }

    pub fn stats(&self) -> StackStats {
        StackStats {
            backend: self.backend.kind(),
            task_count: self.task_count(),
            remaining_count: self.remaining_count(),
        }
    }

    /// Wake every blocked consumer with [`JobStackError::WaitAbandoned`] and
    /// make further takes fail. Admission keeps working.
    pub fn shutdown(&self) {
        self.backend.close();
        debug!("job stack shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.backend.is_closed()
    }
}
