//! Double-ended blocking container for queued job records.
//!
//! [`Backend`] owns the synchronization (mutex, condition variable for
//! blocking consumers, [`Notify`] for async consumers). The ordering itself is
//! delegated to a [`QueueStrategy`] picked at construction time:
//!
//! - [`DequeStrategy`] - a plain double-ended queue.
//! - [`HeapStrategy`] - a min-heap over `(ordering_priority, seq)` that emulates
//!   front insertion by assigning a priority below the current head.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{JobStackError, UnknownBackend};
use crate::types::{JobRecord, JobState};

/// Which [`QueueStrategy`] a backend uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Deque,
    Heap,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deque => "deque",
            Self::Heap => "heap",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deque" => Ok(Self::Deque),
            "heap" => Ok(Self::Heap),
            other => Err(UnknownBackend(other.to_string())),
        }
    }
}

/// Ordering policy of a backend. Not thread-safe; [`Backend`] calls it with
/// its lock held.
pub trait QueueStrategy<M, L>: Send {
    /// Insert so the record is the next one popped.
    fn push_front(&mut self, record: Arc<JobRecord<M, L>>);

    /// Insert behind the records already present.
    fn push_back(&mut self, record: Arc<JobRecord<M, L>>);

    /// Remove the record with the given id, returning whether it was present.
    fn remove(&mut self, id: Uuid) -> bool;

    fn pop(&mut self) -> Option<Arc<JobRecord<M, L>>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every record, in no particular order.
    fn drain(&mut self) -> Vec<Arc<JobRecord<M, L>>>;
}

/// True double-ended queue.
pub struct DequeStrategy<M, L> {
    items: VecDeque<Arc<JobRecord<M, L>>>,
}

impl<M, L> Default for DequeStrategy<M, L> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<M: Send + 'static, L: Send + 'static> QueueStrategy<M, L> for DequeStrategy<M, L> {
    fn push_front(&mut self, record: Arc<JobRecord<M, L>>) {
        self.items.push_front(record);
    }

    fn push_back(&mut self, record: Arc<JobRecord<M, L>>) {
        self.items.push_back(record);
    }

    fn remove(&mut self, id: Uuid) -> bool {
        match self.items.iter().position(|r| r.id() == id) {
            Some(idx) => self.items.remove(idx).is_some(),
            None => false,
        }
    }

    fn pop(&mut self) -> Option<Arc<JobRecord<M, L>>> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn drain(&mut self) -> Vec<Arc<JobRecord<M, L>>> {
        self.items.drain(..).collect()
    }
}

struct HeapEntry<M, L> {
    priority: i64,
    seq: u64,
    record: Arc<JobRecord<M, L>>,
}

impl<M, L> PartialEq for HeapEntry<M, L> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<M, L> Eq for HeapEntry<M, L> {}

impl<M, L> PartialOrd for HeapEntry<M, L> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M, L> Ord for HeapEntry<M, L> {
    // BinaryHeap is a max-heap: reversed so the smallest (priority, seq) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority heap emulating a double-ended queue.
///
/// `push_front` gives the record a priority one below the current head (or
/// one below its own when the heap is empty), so it always sorts first. The
/// priority domain only ever drifts downwards. `push_back` keeps the record's
/// priority; the insertion sequence number breaks ties so equal priorities
/// stay FIFO.
pub struct HeapStrategy<M, L> {
    heap: BinaryHeap<HeapEntry<M, L>>,
    next_seq: u64,
}

impl<M, L> Default for HeapStrategy<M, L> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<M, L> HeapStrategy<M, L> {
    fn insert(&mut self, priority: i64, record: Arc<JobRecord<M, L>>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry {
            priority,
            seq,
            record,
        });
    }

    /// Priority of the record that would be popped next.
    pub fn head_priority(&self) -> Option<i64> {
        self.heap.peek().map(|e| e.priority)
    }
}

impl<M: Send + 'static, L: Send + 'static> QueueStrategy<M, L> for HeapStrategy<M, L> {
    fn push_front(&mut self, record: Arc<JobRecord<M, L>>) {
        let priority = match self.head_priority() {
            Some(head) => head - 1,
            None => record.ordering_priority() - 1,
        };
        record.set_ordering_priority(priority);
        self.insert(priority, record);
    }

    fn push_back(&mut self, record: Arc<JobRecord<M, L>>) {
        let priority = record.ordering_priority();
        self.insert(priority, record);
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let before = self.heap.len();
        self.heap.retain(|e| e.record.id() != id);
        self.heap.len() != before
    }

    fn pop(&mut self) -> Option<Arc<JobRecord<M, L>>> {
        self.heap.pop().map(|e| e.record)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn drain(&mut self) -> Vec<Arc<JobRecord<M, L>>> {
        self.heap.drain().map(|entry| entry.record).collect()
    }
}

struct BackendState<M, L> {
    strategy: Box<dyn QueueStrategy<M, L>>,
    closed: bool,
}

/// Thread-safe double-ended container of queued records.
///
/// Every operation may be called concurrently. [`take`](Self::take) parks the
/// calling thread until a record is available; each record is handed to
/// exactly one consumer.
pub struct Backend<M, L> {
    kind: BackendKind,
    state: Mutex<BackendState<M, L>>,
    available: Condvar,
    notify: Notify,
}

impl<M, L> fmt::Debug for Backend<M, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Backend")
            .field("kind", &self.kind)
            .field("len", &state.strategy.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<M: Send + 'static, L: Send + 'static> Backend<M, L> {
    pub fn new(kind: BackendKind) -> Self {
        let strategy: Box<dyn QueueStrategy<M, L>> = match kind {
            BackendKind::Deque => Box::new(DequeStrategy::default()),
            BackendKind::Heap => Box::new(HeapStrategy::default()),
        };
        Self {
            kind,
            state: Mutex::new(BackendState {
                strategy,
                closed: false,
            }),
            available: Condvar::new(),
            notify: Notify::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Insert ahead of everything currently present.
    pub fn add_first(&self, record: Arc<JobRecord<M, L>>) {
        self.state.lock().strategy.push_front(record);
        self.wake_one();
    }

    /// Insert behind everything currently present.
    pub fn add_last(&self, record: Arc<JobRecord<M, L>>) {
        self.state.lock().strategy.push_back(record);
        self.wake_one();
    }

    /// Remove `record` by identity. `false` means it was not queued, e.g. a
    /// consumer already took it.
    pub fn remove(&self, record: &JobRecord<M, L>) -> bool {
        self.state.lock().strategy.remove(record.id())
    }

    /// Block until a record is available and return it.
    pub fn take(&self) -> Result<Arc<JobRecord<M, L>>, JobStackError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(JobStackError::WaitAbandoned);
            }
            if let Some(record) = state.strategy.pop() {
                return Ok(record);
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`, returning
    /// `Ok(None)`. A timeout too large to form a deadline waits forever.
    pub fn take_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Arc<JobRecord<M, L>>>, JobStackError> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.take().map(Some);
        };
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(JobStackError::WaitAbandoned);
            }
            if let Some(record) = state.strategy.pop() {
                return Ok(Some(record));
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                if state.closed {
                    return Err(JobStackError::WaitAbandoned);
                }
                return Ok(state.strategy.pop());
            }
        }
    }

    /// Pop the head without waiting.
    pub fn try_take(&self) -> Option<Arc<JobRecord<M, L>>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.strategy.pop()
    }

    /// Async counterpart of [`take`](Self::take). Dropping the future
    /// abandons the wait without consuming a record.
    pub async fn take_async(&self) -> Result<Arc<JobRecord<M, L>>, JobStackError> {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(JobStackError::WaitAbandoned);
                }
                if let Some(record) = state.strategy.pop() {
                    return Ok(record);
                }
            }
            notified.await;
        }
    }

    pub fn size(&self) -> usize {
        self.state.lock().strategy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().strategy.is_empty()
    }

    /// Discard every queued record, marking each [`JobState::Cleared`].
    /// Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let drained = self.state.lock().strategy.drain();
        for record in &drained {
            record.set_state(JobState::Cleared);
        }
        drained.len()
    }

    /// Release every waiting consumer with [`JobStackError::WaitAbandoned`].
    /// Queued records stay in place and keep counting towards
    /// [`size`](Self::size).
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn wake_one(&self) {
        self.available.notify_one();
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LoadRequest;
    use std::thread;

    type Record = JobRecord<LoadRequest, ()>;

    fn record(key: &str) -> Arc<Record> {
        Arc::new(JobRecord::new(key.to_string(), LoadRequest::new(key), ()))
    }

    fn drain(backend: &Backend<LoadRequest, ()>) -> Vec<String> {
        let mut keys = Vec::new();
        while let Some(r) = backend.try_take() {
            keys.push(r.key().to_string());
        }
        keys
    }

    #[test]
    fn backend_kind_parses() {
        assert_eq!("deque".parse::<BackendKind>().unwrap(), BackendKind::Deque);
        assert_eq!(" HEAP ".parse::<BackendKind>().unwrap(), BackendKind::Heap);
        assert!("stack".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::default(), BackendKind::Deque);
        assert_eq!(BackendKind::Heap.to_string(), "heap");
    }

    #[test]
    fn deque_front_and_back() {
        let backend = Backend::new(BackendKind::Deque);
        backend.add_last(record("a"));
        backend.add_first(record("b"));
        backend.add_last(record("c"));
        backend.add_first(record("d"));
        assert_eq!(backend.size(), 4);
        assert_eq!(drain(&backend), ["d", "b", "a", "c"]);
        assert!(backend.is_empty());
    }

    #[test]
    fn heap_front_and_back() {
        let backend = Backend::new(BackendKind::Heap);
        backend.add_last(record("a"));
        backend.add_first(record("b"));
        backend.add_last(record("c"));
        backend.add_first(record("d"));
        assert_eq!(drain(&backend), ["d", "b", "a", "c"]);
    }

    #[test]
    fn heap_add_first_assigns_below_head() {
        let mut heap: HeapStrategy<LoadRequest, ()> = HeapStrategy::default();
        let first = record("first");
        heap.push_front(first.clone());
        // empty heap: own priority minus one
        assert_eq!(first.ordering_priority(), -1);

        let second = record("second");
        heap.push_front(second.clone());
        assert_eq!(second.ordering_priority(), -2);
        assert_eq!(heap.head_priority(), Some(-2));

        let tail = record("tail");
        heap.push_back(tail.clone());
        assert_eq!(tail.ordering_priority(), 0);
    }

    #[test]
    fn heap_add_last_is_fifo_for_equal_priorities() {
        let backend = Backend::new(BackendKind::Heap);
        for key in ["a", "b", "c", "d", "e"] {
            backend.add_last(record(key));
        }
        assert_eq!(drain(&backend), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn remove_by_identity() {
        for kind in [BackendKind::Deque, BackendKind::Heap] {
            let backend = Backend::new(kind);
            let a = record("a");
            let a_twin = record("a");
            backend.add_last(a.clone());
            backend.add_last(record("b"));

            assert!(!backend.remove(&a_twin), "{kind}: same key, different record");
            assert!(backend.remove(&a));
            assert!(!backend.remove(&a));
            assert_eq!(drain(&backend), ["b"]);
        }
    }

    #[test]
    fn clear_empties_backend() {
        let backend = Backend::new(BackendKind::Heap);
        backend.add_first(record("a"));
        backend.add_last(record("b"));
        let a = backend.try_take().unwrap();
        backend.add_first(Arc::clone(&a));
        assert_eq!(backend.clear(), 2);
        assert_eq!(backend.size(), 0);
        assert!(backend.try_take().is_none());
        assert_eq!(a.state(), JobState::Cleared);
    }

    #[test]
    fn take_timeout_accepts_unbounded_wait() {
        let backend = Backend::new(BackendKind::Deque);
        backend.add_last(record("a"));
        let taken = backend.take_timeout(Duration::MAX).unwrap();
        assert_eq!(taken.map(|r| r.key().to_string()).as_deref(), Some("a"));

        backend.close();
        assert_eq!(
            backend.take_timeout(Duration::MAX).unwrap_err(),
            JobStackError::WaitAbandoned
        );
    }

    #[test]
    fn take_blocks_until_record_arrives() {
        let backend = Arc::new(Backend::new(BackendKind::Deque));
        let consumer = {
            let backend = Arc::clone(&backend);
            thread::spawn(move || backend.take().map(|r| r.key().to_string()))
        };
        thread::sleep(Duration::from_millis(50));
        backend.add_last(record("late"));
        assert_eq!(consumer.join().unwrap(), Ok("late".to_string()));
    }

    #[test]
    fn close_abandons_blocked_take() {
        let backend: Arc<Backend<LoadRequest, ()>> = Arc::new(Backend::new(BackendKind::Heap));
        let consumer = {
            let backend = Arc::clone(&backend);
            thread::spawn(move || backend.take().map(|r| r.key().to_string()))
        };
        thread::sleep(Duration::from_millis(50));
        backend.close();
        assert_eq!(consumer.join().unwrap(), Err(JobStackError::WaitAbandoned));
        assert!(backend.is_closed());
    }

    #[test]
    fn closed_backend_keeps_records_counted() {
        let backend = Backend::new(BackendKind::Deque);
        backend.add_last(record("a"));
        backend.close();
        assert_eq!(backend.size(), 1);
        assert!(backend.try_take().is_none());
        assert_eq!(
            backend.take().map(|r| r.key().to_string()),
            Err(JobStackError::WaitAbandoned)
        );
    }

    #[test]
    fn take_timeout_elapses() {
        let backend: Backend<LoadRequest, ()> = Backend::new(BackendKind::Deque);
        let started = Instant::now();
        let got = backend.take_timeout(Duration::from_millis(30)).unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));

        backend.add_first(record("a"));
        let got = backend.take_timeout(Duration::from_millis(30)).unwrap();
        assert_eq!(got.map(|r| r.key().to_string()).as_deref(), Some("a"));
    }

    #[test]
    fn each_record_served_once_to_concurrent_consumers() {
        let backend = Arc::new(Backend::new(BackendKind::Heap));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(Some(r)) = backend.take_timeout(Duration::from_millis(200)) {
                        seen.push(r.key().to_string());
                    }
                    seen
                })
            })
            .collect();
        for i in 0..200 {
            backend.add_last(record(&format!("k{i}")));
        }
        let mut all: Vec<String> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        assert_eq!(all.len(), 200);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
