//! Live, process-local upload progress.
//!
//! Progress is advisory: the chunk ledger is the durable record of what has
//! landed, so losing this state on restart only affects what clients see
//! until the next chunk arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use photoloom_protocol::{ProgressSnapshot, ProgressStatus, percentage};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Storage for progress entries.
///
/// The in-process [`MemoryProgressStore`] is the default; a shared cache can
/// implement this to serve progress across several nodes.
pub trait ProgressStore: Send + Sync {
    /// Creates a fresh zeroed entry, replacing any previous one.
    fn initialize(&self, target_id: Uuid, owner_id: Uuid, total_bytes: u64, total_chunks: u32);

    /// Adds `size` bytes and one chunk to the counters.
    fn record_chunk(&self, target_id: Uuid, size: u64) -> Option<ProgressSnapshot>;

    /// Moves the entry to `status`. Terminal entries are never changed again.
    fn set_status(
        &self,
        target_id: Uuid,
        status: ProgressStatus,
        error: Option<String>,
    ) -> Option<ProgressSnapshot>;

    fn snapshot(&self, target_id: Uuid) -> Option<ProgressSnapshot>;

    /// Flags a terminal entry as seen by a client so it can be evicted.
    fn mark_observed(&self, target_id: Uuid);

    fn remove(&self, target_id: Uuid);

    /// Drops observed terminal entries and entries idle for at least
    /// `max_idle`. Returns how many were removed.
    fn evict_idle(&self, max_idle: Duration) -> usize;
}

struct ProgressEntry {
    owner_id: Uuid,
    total_bytes: u64,
    total_chunks: u32,
    uploaded_bytes: AtomicU64,
    uploaded_chunks: AtomicU32,
    observed: AtomicBool,
    state: Mutex<EntryState>,
}

struct EntryState {
    status: ProgressStatus,
    error: Option<String>,
    updated_at: Instant,
}

impl ProgressEntry {
    fn snapshot(&self, target_id: Uuid) -> ProgressSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let uploaded_bytes = self.uploaded_bytes.load(Ordering::Acquire);
        ProgressSnapshot {
            target_id,
            owner_id: self.owner_id,
            status: state.status,
            uploaded_bytes,
            total_bytes: self.total_bytes,
            percentage: percentage(uploaded_bytes, self.total_bytes),
            uploaded_chunks: self.uploaded_chunks.load(Ordering::Acquire),
            total_chunks: self.total_chunks,
            error: state.error.clone(),
        }
    }

    fn touch(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.updated_at = Instant::now();
    }
}

/// Keyed in-memory progress table with atomic per-entry counters.
#[derive(Default)]
pub struct MemoryProgressStore {
    entries: RwLock<HashMap<Uuid, Arc<ProgressEntry>>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, target_id: Uuid) -> Option<Arc<ProgressEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&target_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressStore for MemoryProgressStore {
    fn initialize(&self, target_id: Uuid, owner_id: Uuid, total_bytes: u64, total_chunks: u32) {
        let entry = Arc::new(ProgressEntry {
            owner_id,
            total_bytes,
            total_chunks,
            uploaded_bytes: AtomicU64::new(0),
            uploaded_chunks: AtomicU32::new(0),
            observed: AtomicBool::new(false),
            state: Mutex::new(EntryState {
                status: ProgressStatus::Uploading,
                error: None,
                updated_at: Instant::now(),
            }),
        });
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(target_id, entry);
    }

    fn record_chunk(&self, target_id: Uuid, size: u64) -> Option<ProgressSnapshot> {
        let entry = self.entry(target_id)?;
        entry.uploaded_bytes.fetch_add(size, Ordering::AcqRel);
        entry.uploaded_chunks.fetch_add(1, Ordering::AcqRel);
        entry.touch();
        Some(entry.snapshot(target_id))
    }

    fn set_status(
        &self,
        target_id: Uuid,
        status: ProgressStatus,
        error: Option<String>,
    ) -> Option<ProgressSnapshot> {
        let entry = self.entry(target_id)?;
        {
            let mut state = entry.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.status.is_terminal() {
                debug!(%target_id, current = ?state.status, requested = ?status, "progress already terminal");
            } else {
                state.status = status;
                state.error = error;
                state.updated_at = Instant::now();
            }
        }
        Some(entry.snapshot(target_id))
    }

    fn snapshot(&self, target_id: Uuid) -> Option<ProgressSnapshot> {
        self.entry(target_id).map(|e| e.snapshot(target_id))
    }

    fn mark_observed(&self, target_id: Uuid) {
        if let Some(entry) = self.entry(target_id) {
            entry.observed.store(true, Ordering::Release);
        }
    }

    fn remove(&self, target_id: Uuid) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&target_id);
    }

    fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| {
            let state = entry.state.lock().unwrap_or_else(PoisonError::into_inner);
            let seen_terminal =
                state.status.is_terminal() && entry.observed.load(Ordering::Acquire);
            let idle = now.duration_since(state.updated_at) >= max_idle;
            !(seen_terminal || idle)
        });
        before - entries.len()
    }
}

/// Callback invoked with every progress change.
pub type ProgressCallback = Box<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Progress facade used by the receiver and assembler.
///
/// Wraps a [`ProgressStore`] and pushes every change to registered callbacks
/// (e.g. a websocket broadcaster).
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    callbacks: RwLock<Vec<ProgressCallback>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Arc::new(MemoryProgressStore::new()))
    }
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self {
            store,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&self, callback: ProgressCallback) {
        let mut callbacks = self.callbacks.write().unwrap_or_else(PoisonError::into_inner);
        callbacks.push(callback);
    }

    fn publish(&self, snapshot: Option<ProgressSnapshot>) -> Option<ProgressSnapshot> {
        if let Some(snapshot) = &snapshot {
            let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
            for cb in callbacks.iter() {
                cb(snapshot);
            }
        }
        snapshot
    }

    pub fn initialize(&self, target_id: Uuid, owner_id: Uuid, total_bytes: u64, total_chunks: u32) {
        self.store
            .initialize(target_id, owner_id, total_bytes, total_chunks);
        self.publish(self.store.snapshot(target_id));
    }

    pub fn record_chunk(&self, target_id: Uuid, size: u64) -> Option<ProgressSnapshot> {
        self.publish(self.store.record_chunk(target_id, size))
    }

    pub fn mark_assembling(&self, target_id: Uuid) -> Option<ProgressSnapshot> {
        self.publish(
            self.store
                .set_status(target_id, ProgressStatus::Assembling, None),
        )
    }

    pub fn complete(&self, target_id: Uuid) -> Option<ProgressSnapshot> {
        self.publish(
            self.store
                .set_status(target_id, ProgressStatus::Completed, None),
        )
    }

    pub fn fail(&self, target_id: Uuid, message: impl Into<String>) -> Option<ProgressSnapshot> {
        self.publish(self.store.set_status(
            target_id,
            ProgressStatus::Failed,
            Some(message.into()),
        ))
    }

    pub fn cancel(&self, target_id: Uuid) -> Option<ProgressSnapshot> {
        self.publish(
            self.store
                .set_status(target_id, ProgressStatus::Cancelled, None),
        )
    }

    /// Returns the current state without side effects.
    pub fn snapshot(&self, target_id: Uuid) -> Option<ProgressSnapshot> {
        self.store.snapshot(target_id)
    }

    /// Returns the current state for a client, flagging terminal entries as
    /// observed so the next eviction pass can drop them.
    pub fn observe(&self, target_id: Uuid) -> Option<ProgressSnapshot> {
        let snapshot = self.store.snapshot(target_id)?;
        if snapshot.status.is_terminal() {
            self.store.mark_observed(target_id);
        }
        Some(snapshot)
    }

    pub fn remove(&self, target_id: Uuid) {
        self.store.remove(target_id);
    }

    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.store.evict_idle(max_idle)
    }

    /// Runs [`evict_idle`](Self::evict_idle) every `interval` until `cancel` fires.
    pub fn spawn_eviction(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = tracker.evict_idle(max_idle);
                        if removed > 0 {
                            debug!(removed, "evicted progress entries");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}
