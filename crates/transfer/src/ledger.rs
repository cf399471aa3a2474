//! Durable chunk bookkeeping.
//!
//! The ledger is the source of truth for which indices of a target have
//! landed. [`ChunkLedger::mark_uploaded`] is the single mutation point that
//! decides when a target becomes ready for assembly.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use photoloom_protocol::ChunkStatus;
use uuid::Uuid;

use crate::error::UploadError;
use crate::types::ChunkRecord;

/// Boxed future returned by the collaborator traits of this crate.
pub type UploadFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Result of trying to take ownership of a chunk index.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller owns the index and must store it, then call
    /// `mark_uploaded` or `mark_failed`.
    Acquired(ChunkRecord),
    AlreadyUploaded(ChunkRecord),
    /// Another submission of the same index is being stored right now.
    InFlight,
}

/// Persistent record of chunk receipt per target.
pub trait ChunkLedger: Send + Sync {
    fn get(&self, target_id: Uuid, index: u32) -> UploadFuture<'_, Option<ChunkRecord>>;

    /// Registers `record` as pending unless the index is already uploaded or
    /// in flight. A previously failed record is taken over with its retry
    /// counter incremented.
    fn claim(&self, record: ChunkRecord) -> UploadFuture<'_, Claim>;

    /// Flips a claimed record to uploaded and returns the number of uploaded
    /// chunks for the target, atomically with the flip.
    fn mark_uploaded(&self, target_id: Uuid, index: u32) -> UploadFuture<'_, u32>;

    /// Releases a claim after a failed store so the index can be resubmitted.
    fn mark_failed(&self, target_id: Uuid, index: u32) -> UploadFuture<'_, ()>;

    fn uploaded_indices(&self, target_id: Uuid) -> UploadFuture<'_, Vec<u32>>;

    /// Uploaded records ordered by index.
    fn uploaded_records(&self, target_id: Uuid) -> UploadFuture<'_, Vec<ChunkRecord>>;

    /// Drops every record of the target. Returns how many were removed.
    fn purge(&self, target_id: Uuid) -> UploadFuture<'_, usize>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TargetChunks {
    records: BTreeMap<u32, ChunkRecord>,
    uploaded: u32,
}

/// Process-local ledger. One mutex guards all targets, so every claim and
/// count update is linearizable.
#[derive(Default)]
pub struct MemoryChunkLedger {
    targets: Mutex<HashMap<Uuid, TargetChunks>>,
}

impl MemoryChunkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_targets<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, TargetChunks>) -> T) -> T {
        let mut targets = self.targets.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut targets)
    }
}

impl ChunkLedger for MemoryChunkLedger {
    fn get(&self, target_id: Uuid, index: u32) -> UploadFuture<'_, Option<ChunkRecord>> {
        let record = self.with_targets(|targets| {
            targets
                .get(&target_id)
                .and_then(|t| t.records.get(&index).cloned())
        });
        Box::pin(async move { Ok(record) })
    }

    fn claim(&self, mut record: ChunkRecord) -> UploadFuture<'_, Claim> {
        let claim = self.with_targets(|targets| {
            let chunks = targets.entry(record.target_id).or_default();
            match chunks.records.get(&record.index) {
                Some(existing) if existing.status == ChunkStatus::Uploaded => {
                    Claim::AlreadyUploaded(existing.clone())
                }
                Some(existing) if existing.status == ChunkStatus::Pending => Claim::InFlight,
                previous => {
                    record.retry_count = previous.map_or(0, |p| p.retry_count + 1);
                    record.status = ChunkStatus::Pending;
                    chunks.records.insert(record.index, record.clone());
                    Claim::Acquired(record)
                }
            }
        });
        Box::pin(async move { Ok(claim) })
    }

    fn mark_uploaded(&self, target_id: Uuid, index: u32) -> UploadFuture<'_, u32> {
        let result = self.with_targets(|targets| {
            let chunks = targets
                .get_mut(&target_id)
                .ok_or(UploadError::NotFound(target_id))?;
            let record = chunks.records.get_mut(&index).ok_or_else(|| {
                UploadError::Validation(format!("chunk {index} of {target_id} was never claimed"))
            })?;
            if record.status != ChunkStatus::Uploaded {
                record.status = ChunkStatus::Uploaded;
                record.received_at = Utc::now();
                chunks.uploaded += 1;
            }
            Ok(chunks.uploaded)
        });
        Box::pin(async move { result })
    }

    fn mark_failed(&self, target_id: Uuid, index: u32) -> UploadFuture<'_, ()> {
        self.with_targets(|targets| {
            if let Some(record) = targets
                .get_mut(&target_id)
                .and_then(|t| t.records.get_mut(&index))
                .filter(|r| r.status == ChunkStatus::Pending)
            {
                record.status = ChunkStatus::Failed;
            }
        });
        Box::pin(async { Ok(()) })
    }

    fn uploaded_indices(&self, target_id: Uuid) -> UploadFuture<'_, Vec<u32>> {
        let indices = self.with_targets(|targets| {
            targets.get(&target_id).map_or_else(Vec::new, |t| {
                t.records
                    .values()
                    .filter(|r| r.status == ChunkStatus::Uploaded)
                    .map(|r| r.index)
                    .collect()
            })
        });
        Box::pin(async move { Ok(indices) })
    }

    fn uploaded_records(&self, target_id: Uuid) -> UploadFuture<'_, Vec<ChunkRecord>> {
        let records = self.with_targets(|targets| {
            targets.get(&target_id).map_or_else(Vec::new, |t| {
                t.records
                    .values()
                    .filter(|r| r.status == ChunkStatus::Uploaded)
                    .cloned()
                    .collect()
            })
        });
        Box::pin(async move { Ok(records) })
    }

    fn purge(&self, target_id: Uuid) -> UploadFuture<'_, usize> {
        let removed = self.with_targets(|targets| {
            targets
                .remove(&target_id)
                .map_or(0, |t| t.records.len())
        });
        Box::pin(async move { Ok(removed) })
    }
}
