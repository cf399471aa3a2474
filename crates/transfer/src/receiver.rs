//! Chunk receipt with idempotent replay and single-shot completion.

use std::sync::Arc;

use photoloom_protocol::{
    ChunkProgress, ChunkStatus, ChunkUploadResponse, ChunkUploadStatus, ReceiverState,
    TargetStatus, percentage,
};
use photoloom_storage::ObjectBody;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::assembler::Assembler;
use crate::chunked::checksum_bytes;
use crate::context::UploadContext;
use crate::error::UploadError;
use crate::ledger::Claim;
use crate::types::{ChunkRecord, ChunkSubmission, UploadTarget, chunk_key};
use crate::validation::validate_chunk;

const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

pub struct ChunkReceiver {
    ctx: UploadContext,
    assembler: Arc<Assembler>,
}

impl ChunkReceiver {
    pub fn new(ctx: UploadContext, assembler: Arc<Assembler>) -> Self {
        Self { ctx, assembler }
    }

    /// Stores one chunk and records it in the ledger.
    ///
    /// Replaying an index that is already uploaded returns the current
    /// aggregate without writing anything. The submission that brings the
    /// uploaded count to the declared total schedules assembly on the upload
    /// pool and returns without waiting for it. If that scheduling failed, a
    /// replay of any chunk schedules it again.
    pub async fn submit_chunk(
        &self,
        caller: Uuid,
        chunk: ChunkSubmission,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let target = self.ctx.authorized_target(caller, chunk.target_id).await?;
        validate_chunk(&target, &chunk)?;

        let existing = self.ctx.ledger.get(target.id, chunk.index).await?;
        if existing.is_some_and(|r| r.status == ChunkStatus::Uploaded) {
            return self.duplicate(&target, chunk.index).await;
        }
        if target.status != TargetStatus::Uploading {
            return Err(UploadError::Validation(format!(
                "upload {} is {:?} and no longer accepts chunks",
                target.id, target.status
            )));
        }

        let size = chunk.data.len() as u64;
        let checksum = chunk
            .checksum
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| checksum_bytes(&chunk.data));
        let record = ChunkRecord::pending(target.id, chunk.index, size, checksum);

        match self.ctx.ledger.claim(record).await? {
            Claim::Acquired(record) if record.retry_count > 0 => {
                debug!(target_id = %target.id, index = chunk.index, retry = record.retry_count, "resubmitted chunk");
            }
            Claim::Acquired(_) => {}
            Claim::AlreadyUploaded(_) => {
                return self.duplicate(&target, chunk.index).await;
            }
            Claim::InFlight => {
                return self.in_progress(&target, chunk.index).await;
            }
        }

        let key = chunk_key(target.id, chunk.index);
        if let Err(e) = self
            .ctx
            .storage
            .store(&key, ObjectBody::Bytes(chunk.data), CHUNK_CONTENT_TYPE, size)
            .await
        {
            warn!(target_id = %target.id, index = chunk.index, error = %e, "chunk store failed");
            self.ctx.ledger.mark_failed(target.id, chunk.index).await?;
            return Err(e.into());
        }

        let uploaded = self.ctx.ledger.mark_uploaded(target.id, chunk.index).await?;
        let progress = self
            .ctx
            .progress
            .record_chunk(target.id, size)
            .map_or_else(|| percentage(0, target.total_bytes), |s| s.percentage);
        debug!(
            target_id = %target.id,
            index = chunk.index,
            uploaded,
            total = target.total_chunks,
            "chunk stored"
        );

        if uploaded == target.total_chunks {
            if let Err(e) = self.schedule_assembly(target.id).await {
                warn!(target_id = %target.id, error = %e, "assembly not scheduled, a replay will retry");
                return Err(e);
            }
            return Ok(ChunkUploadResponse {
                target_id: target.id,
                chunk_index: chunk.index,
                status: ChunkUploadStatus::Completed,
                uploaded_chunks: uploaded,
                total_chunks: target.total_chunks,
                progress,
                message: "all chunks received, assembling".into(),
            });
        }

        Ok(ChunkUploadResponse {
            target_id: target.id,
            chunk_index: chunk.index,
            status: ChunkUploadStatus::Uploaded,
            uploaded_chunks: uploaded,
            total_chunks: target.total_chunks,
            progress,
            message: format!("chunk {} received", chunk.index),
        })
    }

    /// Which indices have landed and which are still missing.
    pub async fn chunk_progress(
        &self,
        caller: Uuid,
        target_id: Uuid,
    ) -> Result<ChunkProgress, UploadError> {
        let target = self.ctx.authorized_target(caller, target_id).await?;
        let uploaded = self.ctx.ledger.uploaded_indices(target_id).await?;
        let missing_indices = (0..target.total_chunks)
            .filter(|i| uploaded.binary_search(i).is_err())
            .collect();
        let uploaded_count = uploaded.len() as u32;
        Ok(ChunkProgress {
            target_id,
            uploaded_count,
            total_chunks: target.total_chunks,
            missing_indices,
            state: ReceiverState::from_counts(uploaded_count, target.total_chunks),
        })
    }

    /// Reports the current aggregate for an index that is already stored.
    ///
    /// A complete ledger on a target still UPLOADING means the assembly task
    /// was never accepted; it is scheduled again here and the catalog claim
    /// keeps a second run from doing anything.
    async fn duplicate(
        &self,
        target: &UploadTarget,
        index: u32,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let (uploaded_chunks, progress) = self.aggregate(target).await?;
        let mut message = format!("chunk {index} already received");
        if uploaded_chunks == target.total_chunks && target.status == TargetStatus::Uploading {
            self.schedule_assembly(target.id).await?;
            message = "all chunks received, assembling".into();
        } else {
            debug!(target_id = %target.id, index, "duplicate chunk ignored");
        }
        Ok(ChunkUploadResponse {
            target_id: target.id,
            chunk_index: index,
            status: ChunkUploadStatus::Duplicate,
            uploaded_chunks,
            total_chunks: target.total_chunks,
            progress,
            message,
        })
    }

    async fn in_progress(
        &self,
        target: &UploadTarget,
        index: u32,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let (uploaded_chunks, progress) = self.aggregate(target).await?;
        debug!(target_id = %target.id, index, "chunk already being stored");
        Ok(ChunkUploadResponse {
            target_id: target.id,
            chunk_index: index,
            status: ChunkUploadStatus::InProgress,
            uploaded_chunks,
            total_chunks: target.total_chunks,
            progress,
            message: format!("chunk {index} is still being stored, resubmit to confirm"),
        })
    }

    async fn aggregate(&self, target: &UploadTarget) -> Result<(u32, f64), UploadError> {
        let records = self.ctx.ledger.uploaded_records(target.id).await?;
        let uploaded_bytes = records.iter().map(|r| r.size).sum();
        Ok((
            records.len() as u32,
            percentage(uploaded_bytes, target.total_bytes),
        ))
    }

    async fn schedule_assembly(&self, target_id: Uuid) -> Result<(), UploadError> {
        info!(%target_id, "all chunks received, scheduling assembly");
        let assembler = Arc::clone(&self.assembler);
        let task = async move {
            if let Err(e) = assembler.assemble(target_id).await {
                error!(%target_id, error = %e, "assembly could not start");
            }
        };
        self.ctx.pools.upload.submit(task).await?;
        Ok(())
    }
}
