//! Assembly of received chunks into the permanent object.
//!
//! One assembly run per target: the run claims the target with a status
//! compare-and-swap (`Uploading -> Processing`), so a second invocation for
//! the same target is a no-op. The whole attempt (load records, concatenate,
//! persist, clean up) is the retried unit.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use photoloom_protocol::TargetStatus;
use photoloom_retry::{Attempted, RetryPolicy, Retrier};
use photoloom_storage::{ObjectBody, StorageError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::UploadContext;
use crate::error::UploadError;
use crate::types::UploadTarget;

/// How an assembly request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyOutcome {
    /// The object is persisted under `key` and the target is COMPLETED.
    Completed { key: String, attempts: u32 },
    /// The target is FAILED; `message` is what the progress query reports.
    Failed { message: String, attempts: u32 },
    /// Another run already claimed the target, or it was cancelled.
    Skipped,
}

pub struct Assembler {
    ctx: UploadContext,
    policy: RetryPolicy,
    retrier: Retrier,
    spool_dir: PathBuf,
}

impl Assembler {
    pub fn new(ctx: UploadContext, retrier: Retrier, spool_dir: PathBuf) -> Self {
        Self {
            ctx,
            policy: RetryPolicy::aggressive(),
            retrier,
            spool_dir,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Concatenates the chunks of `target_id` and drives the target to
    /// COMPLETED or FAILED.
    ///
    /// Failures inside the retried unit never surface as `Err`; they end in
    /// [`AssemblyOutcome::Failed`]. `Err` is only returned when the target
    /// cannot be loaded or claimed.
    pub async fn assemble(&self, target_id: Uuid) -> Result<AssemblyOutcome, UploadError> {
        let target = self
            .ctx
            .catalog
            .get(target_id)
            .await?
            .ok_or(UploadError::NotFound(target_id))?;

        if !self
            .ctx
            .catalog
            .transition(target_id, TargetStatus::Uploading, TargetStatus::Processing)
            .await?
        {
            debug!(%target_id, "assembly already claimed, skipping");
            return Ok(AssemblyOutcome::Skipped);
        }
        self.ctx.progress.mark_assembling(target_id);
        info!(
            %target_id,
            chunks = target.total_chunks,
            bytes = target.total_bytes,
            "assembling upload"
        );

        let operation = format!("assemble:{target_id}");
        let result = self
            .retrier
            .execute(&operation, &self.policy, || self.assemble_once(&target))
            .await;

        match result {
            Ok(Attempted { value: key, attempts }) => {
                if self.finish(&target, &key).await? {
                    Ok(AssemblyOutcome::Completed { key, attempts })
                } else {
                    Ok(AssemblyOutcome::Skipped)
                }
            }
            Err(err) => {
                let attempts = err.attempts();
                let message = match err.last_error() {
                    Some(cause) if cause.is_transient_storage() => {
                        UploadError::Assembly(format!("{cause} (after {attempts} attempts)"))
                            .to_string()
                    }
                    Some(cause) => cause.to_string(),
                    None => err.to_string(),
                };
                self.fail(&target, &message).await;
                Ok(AssemblyOutcome::Failed { message, attempts })
            }
        }
    }

    /// Completes an object a client uploaded through a pre-signed URL,
    /// skipping concatenation.
    pub async fn finalize_direct_upload(
        &self,
        target: &UploadTarget,
    ) -> Result<AssemblyOutcome, UploadError> {
        let key = target.object_key();
        if !self.ctx.storage.exists(&key).await? {
            return Err(UploadError::Validation(format!(
                "no object has been uploaded for {}",
                target.id
            )));
        }
        if !self
            .ctx
            .catalog
            .transition(target.id, TargetStatus::Uploading, TargetStatus::Processing)
            .await?
        {
            return Ok(AssemblyOutcome::Skipped);
        }
        self.ctx.progress.mark_assembling(target.id);

        if self.finish(target, &key).await? {
            Ok(AssemblyOutcome::Completed { key, attempts: 1 })
        } else {
            Ok(AssemblyOutcome::Skipped)
        }
    }

    async fn assemble_once(&self, target: &UploadTarget) -> Result<String, UploadError> {
        let records = self.ctx.ledger.uploaded_records(target.id).await?;
        if records.len() != target.total_chunks as usize {
            return Err(UploadError::DataIntegrity(format!(
                "expected {} chunks for {}, found {}",
                target.total_chunks,
                target.id,
                records.len()
            )));
        }
        if let Some((expected, _)) = records
            .iter()
            .enumerate()
            .find(|(i, r)| r.index as usize != *i)
        {
            return Err(UploadError::DataIntegrity(format!(
                "chunk {expected} of {} is missing",
                target.id
            )));
        }

        tokio::fs::create_dir_all(&self.spool_dir).await?;
        let spool = tempfile::Builder::new()
            .prefix("photoloom-assembly-")
            .tempfile_in(&self.spool_dir)?;
        let mut out = tokio::fs::File::from_std(spool.reopen()?);

        let mut written = 0u64;
        for record in &records {
            let mut stream = self
                .ctx
                .storage
                .retrieve(&record.key())
                .await
                .map_err(|e| match e {
                    StorageError::NotFound(key) => {
                        UploadError::DataIntegrity(format!("chunk fragment {key} is gone"))
                    }
                    other => other.into(),
                })?;
            while let Some(bytes) = stream.next().await {
                let bytes = bytes?;
                out.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        if written != target.total_bytes {
            return Err(UploadError::DataIntegrity(format!(
                "assembled {written} bytes for {}, declared {}",
                target.id, target.total_bytes
            )));
        }

        let key = target.object_key();
        let locator = self
            .ctx
            .storage
            .store(
                &key,
                ObjectBody::File(spool.path().to_path_buf()),
                &target.content_type,
                written,
            )
            .await?;
        debug!(target_id = %target.id, %locator, bytes = written, "assembled object stored");

        for record in &records {
            if let Err(e) = self.ctx.storage.delete(&record.key()).await {
                warn!(
                    target_id = %target.id,
                    index = record.index,
                    error = %e,
                    "failed to delete chunk fragment"
                );
            }
        }
        Ok(key)
    }

    /// Post-persist steps shared by assembly and direct uploads. Returns
    /// `false` if the target left PROCESSING in the meantime.
    async fn finish(&self, target: &UploadTarget, key: &str) -> Result<bool, UploadError> {
        self.spawn_post_processing(target.clone(), key.to_string())
            .await;

        if !self
            .ctx
            .catalog
            .transition(target.id, TargetStatus::Processing, TargetStatus::Completed)
            .await?
        {
            warn!(target_id = %target.id, "target left processing before completion");
            return Ok(false);
        }
        self.ctx.progress.complete(target.id);
        info!(target_id = %target.id, key, "upload completed");

        self.ctx
            .notifier
            .upload_completed(target.id, target.owner_id)
            .await;
        Ok(true)
    }

    async fn spawn_post_processing(&self, target: UploadTarget, key: String) {
        let processor = Arc::clone(&self.ctx.post_processor);
        let target_id = target.id;
        let task = async move {
            if let Err(e) = processor.process(&target, &key).await {
                warn!(target_id = %target.id, error = %e, "post-processing failed");
            }
        };
        if let Err(e) = self.ctx.pools.processing.submit(task).await {
            warn!(%target_id, error = %e, "post-processing not scheduled");
        }
    }

    async fn fail(&self, target: &UploadTarget, message: &str) {
        match self
            .ctx
            .catalog
            .transition(target.id, TargetStatus::Processing, TargetStatus::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(target_id = %target.id, "target left processing before it could be failed");
                return;
            }
            Err(e) => {
                error!(target_id = %target.id, error = %e, "failed to record assembly failure");
            }
        }
        self.ctx.progress.fail(target.id, message);
        error!(target_id = %target.id, error = message, "upload failed");

        self.ctx
            .notifier
            .upload_failed(target.id, target.owner_id, message)
            .await;
    }
}
