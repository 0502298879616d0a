//! Core types for the job stack: the metadata capability, the stock
//! [`LoadRequest`] description and the shared [`JobRecord`].

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability a job description must expose to be admitted by a
/// [`JobStack`](crate::JobStack).
///
/// The stack only ever reads the key and the flags, and clears the two
/// mutable flags when a higher-priority request for the same key arrives.
pub trait JobMetadata: Send + 'static {
    /// Dedup identity. `None` means the job cannot be coalesced.
    fn key(&self) -> Option<&str>;

    fn is_low_priority(&self) -> bool;

    fn set_low_priority(&mut self, low_priority: bool);

    fn is_precache_request(&self) -> bool;

    fn set_precache_request(&mut self, precache: bool);

    /// Update-only requests may touch an existing job but never create one.
    fn is_update_only(&self) -> bool;
}

/// Scheduling class of a load request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Served from the front of the stack.
    #[default]
    Normal,
    /// Prefetch work, served only after all normal work.
    Low,
}

impl Priority {
    #[inline]
    pub const fn is_low(self) -> bool {
        matches!(self, Self::Low)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Low => "low",
        })
    }
}

/// Stock job description for keyed resource loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadRequest {
    pub key: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub precache: bool,
    #[serde(default)]
    pub update_only: bool,
}

impl LoadRequest {
    /// A normal-priority request for the resource identified by `key`.
    #[inline]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// A request without a dedup key.
    #[inline]
    pub fn unkeyed() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn low_priority(mut self) -> Self {
        self.priority = Priority::Low;
        self
    }

    #[must_use]
    pub fn precache(mut self) -> Self {
        self.precache = true;
        self
    }

    #[must_use]
    pub fn update_only(mut self) -> Self {
        self.update_only = true;
        self
    }
}

impl JobMetadata for LoadRequest {
    fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn is_low_priority(&self) -> bool {
        self.priority.is_low()
    }

    fn set_low_priority(&mut self, low_priority: bool) {
        self.priority = if low_priority {
            Priority::Low
        } else {
            Priority::Normal
        };
    }

    fn is_precache_request(&self) -> bool {
        self.precache
    }

    fn set_precache_request(&mut self, precache: bool) {
        self.precache = precache;
    }

    fn is_update_only(&self) -> bool {
        self.update_only
    }
}

/// Lifecycle of a job record once it has been admitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting in the backend.
    Queued,
    /// Waiting in the backend after being moved to the front.
    Promoted,
    /// Handed to a consumer, still registered under its key.
    Taken,
    /// Released from the key index.
    Complete,
    /// Discarded from the backend by a reset before any consumer took it.
    Cleared,
}

impl JobState {
    /// Returns true if this status represents a terminal state.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cleared)
    }

    /// Returns true while the record sits in the backend.
    #[inline]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Queued | Self::Promoted)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Promoted => "promoted",
            Self::Taken => "taken",
            Self::Complete => "complete",
            Self::Cleared => "cleared",
        })
    }
}

/// Point-in-time view of a [`JobRecord`], for reports and logs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub key: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub taken_at: Option<DateTime<Utc>>,
    pub listeners: usize,
    pub low_priority: bool,
    pub precache: bool,
}

/// Mutable part of a record.
struct RecordInner<M, L> {
    metadata: M,
    listeners: Vec<L>,
    state: JobState,
    taken_at: Option<DateTime<Utc>>,
}

/// A queued or in-flight unit of work.
///
/// Records are shared between the key index and the backend as
/// `Arc<JobRecord<M, L>>`. Flag and listener mutations go through the
/// [`JobStack`](crate::JobStack), which performs them while holding its key
/// index lock.
pub struct JobRecord<M, L> {
    id: Uuid,
    key: String,
    created_at: DateTime<Utc>,
    ordering_priority: AtomicI64,
    inner: Mutex<RecordInner<M, L>>,
}

impl<M, L> fmt::Debug for JobRecord<M, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("JobRecord")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .field("ordering_priority", &self.ordering_priority())
            .finish()
    }
}

impl<M, L> JobRecord<M, L> {
    pub(crate) fn new(key: String, metadata: M, listener: L) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            created_at: Utc::now(),
            ordering_priority: AtomicI64::new(0),
            inner: Mutex::new(RecordInner {
                metadata,
                listeners: vec![listener],
                state: JobState::Queued,
                taken_at: None,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The dedup key this record is registered under.
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().taken_at
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().state
    }

    /// Position value used by the heap backend; smaller is served first.
    #[inline]
    pub fn ordering_priority(&self) -> i64 {
        self.ordering_priority.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_ordering_priority(&self, priority: i64) {
        self.ordering_priority.store(priority, Ordering::Relaxed);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Registered listeners in registration order.
    pub fn listeners(&self) -> Vec<L>
    where
        L: Clone,
    {
        self.inner.lock().listeners.clone()
    }

    /// Run `f` against the record's metadata.
    pub fn with_metadata<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.inner.lock().metadata)
    }

    /// Snapshot of the record's metadata.
    pub fn metadata(&self) -> M
    where
        M: Clone,
    {
        self.inner.lock().metadata.clone()
    }

    pub(crate) fn add_listener(&self, listener: L) {
        self.inner.lock().listeners.push(listener);
    }

    pub(crate) fn with_metadata_mut<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.inner.lock().metadata)
    }

    pub(crate) fn set_state(&self, state: JobState) {
        self.inner.lock().state = state;
    }

    pub(crate) fn mark_taken(&self) {
        let mut inner = self.inner.lock();
        inner.state = JobState::Taken;
        inner.taken_at = Some(Utc::now());
    }
}

impl<M: JobMetadata, L> JobRecord<M, L> {
    /// Capture the record's current state under a single lock.
    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.inner.lock();
        JobSnapshot {
            id: self.id,
            key: self.key.clone(),
            state: inner.state,
            created_at: self.created_at,
            taken_at: inner.taken_at,
            listeners: inner.listeners.len(),
            low_priority: inner.metadata.is_low_priority(),
            precache: inner.metadata.is_precache_request(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_request_builders_set_flags() {
        let req = LoadRequest::new("art/42").low_priority().precache();
        assert_eq!(req.key(), Some("art/42"));
        assert!(req.is_low_priority());
        assert!(req.is_precache_request());
        assert!(!req.is_update_only());

        let unkeyed = LoadRequest::unkeyed().update_only();
        assert_eq!(unkeyed.key(), None);
        assert!(unkeyed.is_update_only());
    }

    #[test]
    fn set_low_priority_toggles_priority() {
        let mut req = LoadRequest::new("a").low_priority();
        req.set_low_priority(false);
        assert_eq!(req.priority, Priority::Normal);
        req.set_low_priority(true);
        assert_eq!(req.priority, Priority::Low);
    }

    #[test]
    fn load_request_deserializes_with_defaults() {
        let req: LoadRequest = serde_json::from_str(r#"{"key":"k"}"#).unwrap();
        assert_eq!(req, LoadRequest::new("k"));

        let low: LoadRequest =
            serde_json::from_str(r#"{"key":"k","priority":"low","precache":true}"#).unwrap();
        assert!(low.is_low_priority());
        assert!(low.is_precache_request());
    }

    #[test]
    fn record_tracks_listeners_in_order() {
        let record = JobRecord::new("k".to_string(), LoadRequest::new("k"), 1u32);
        record.add_listener(2);
        record.add_listener(1);
        assert_eq!(record.listeners(), vec![1, 2, 1]);
        assert_eq!(record.listener_count(), 3);
        assert_eq!(record.state(), JobState::Queued);
        assert!(record.taken_at().is_none());
    }

    #[test]
    fn snapshot_serializes_record() {
        let record = JobRecord::new(
            "art/7".to_string(),
            LoadRequest::new("art/7").low_priority(),
            1u32,
        );
        record.add_listener(2);
        record.mark_taken();

        let snap = record.snapshot();
        assert_eq!(snap.id, record.id());
        assert_eq!(snap.created_at, record.created_at());
        assert_eq!(snap.taken_at, record.taken_at());
        assert_eq!(snap.listeners, 2);
        assert!(snap.low_priority);
        assert!(!snap.precache);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["key"], "art/7");
        assert_eq!(json["state"], "taken");
        assert_eq!(json["id"], record.id().to_string());
        assert!(json["created_at"].is_string());
    }

    #[test]
    fn mark_taken_stamps_time() {
        let record = JobRecord::new("k".to_string(), LoadRequest::new("k"), ());
        record.mark_taken();
        assert_eq!(record.state(), JobState::Taken);
        assert!(record.taken_at().is_some());
        assert!(!record.state().is_queued());
    }

    #[test]
    fn job_state_display_and_terminal() {
        assert_eq!(JobState::Promoted.to_string(), "promoted");
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Cleared.is_terminal());
        assert!(!JobState::Cleared.is_queued());
        assert!(!JobState::Taken.is_terminal());
        assert!(JobState::Promoted.is_queued());
    }
}
