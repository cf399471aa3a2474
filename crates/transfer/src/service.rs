//! Entry point tying the receiver, assembler and progress tracker together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use photoloom_notify::{LogTransport, NotificationTransport, Notifier};
use photoloom_protocol::{
    ChunkProgress, ChunkUploadResponse, DirectUploadGrant, ProgressSnapshot, TargetStatus,
};
use photoloom_retry::{RetryPolicy, Retrier};
use photoloom_storage::{MemoryBackend, StorageBackend};
use photoloom_workers::{PoolStats, WorkerPools};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::DEFAULT_CHUNK_SIZE;
use crate::assembler::{Assembler, AssemblyOutcome};
use crate::catalog::{MemoryCatalog, TargetCatalog};
use crate::chunked::total_chunks_for;
use crate::context::UploadContext;
use crate::error::UploadError;
use crate::hooks::{AccessPolicy, NoopPostProcessor, OwnerOnly, PostProcessor};
use crate::ledger::{ChunkLedger, MemoryChunkLedger};
use crate::progress::{MemoryProgressStore, ProgressStore, ProgressTracker};
use crate::receiver::ChunkReceiver;
use crate::types::{ChunkSubmission, InitUpload, UploadTarget, chunk_key};
use crate::validation::validate_file_name;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables of the upload core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Chunk size used when the client does not pick one.
    pub chunk_size: u64,
    /// Lifetime of pre-signed direct-upload URLs.
    pub presign_ttl_secs: u64,
    /// Progress entries untouched for this long are evicted.
    pub progress_idle_ttl_secs: u64,
    pub progress_sweep_interval_secs: u64,
    /// Where assembly spools concatenated objects. Defaults to the system
    /// temp directory.
    pub spool_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            presign_ttl_secs: 3600,
            progress_idle_ttl_secs: 24 * 3600,
            progress_sweep_interval_secs: 300,
            spool_dir: None,
        }
    }
}

impl ServiceConfig {
    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an [`UploadService`]; every collaborator has an in-process
/// default.
#[derive(Default)]
pub struct UploadServiceBuilder {
    config: ServiceConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    catalog: Option<Arc<dyn TargetCatalog>>,
    ledger: Option<Arc<dyn ChunkLedger>>,
    progress_store: Option<Arc<dyn ProgressStore>>,
    transport: Option<Arc<dyn NotificationTransport>>,
    access: Option<Arc<dyn AccessPolicy>>,
    post_processor: Option<Arc<dyn PostProcessor>>,
    pools: Option<WorkerPools>,
    assembly_policy: Option<RetryPolicy>,
    notify_policy: Option<RetryPolicy>,
    shutdown: Option<CancellationToken>,
}

impl UploadServiceBuilder {
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn TargetCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn ChunkLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn progress_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.progress_store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn access_policy(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn post_processor(mut self, processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processor = Some(processor);
        self
    }

    pub fn pools(mut self, pools: WorkerPools) -> Self {
        self.pools = Some(pools);
        self
    }

    /// Overrides the aggressive policy used for assembly.
    pub fn assembly_policy(mut self, policy: RetryPolicy) -> Self {
        self.assembly_policy = Some(policy);
        self
    }

    /// Overrides the webhook policy used for notifications.
    pub fn notify_policy(mut self, policy: RetryPolicy) -> Self {
        self.notify_policy = Some(policy);
        self
    }

    /// Backoff waits in assembly and notification retries end early when
    /// `token` is cancelled.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> UploadService {
        let pools = self.pools.unwrap_or_default();
        let shutdown = self.shutdown.unwrap_or_default();
        let retrier = Retrier::with_shutdown(shutdown.clone());

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(LogTransport));
        let mut notifier =
            Notifier::new(transport, pools.notify.clone()).with_retrier(retrier.clone());
        if let Some(policy) = self.notify_policy {
            notifier = notifier.with_policy(policy);
        }

        let progress = Arc::new(ProgressTracker::new(
            self.progress_store
                .unwrap_or_else(|| Arc::new(MemoryProgressStore::new())),
        ));

        let ctx = UploadContext {
            catalog: self.catalog.unwrap_or_else(|| Arc::new(MemoryCatalog::new())),
            ledger: self
                .ledger
                .unwrap_or_else(|| Arc::new(MemoryChunkLedger::new())),
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryBackend::new())),
            progress,
            notifier,
            access: self.access.unwrap_or_else(|| Arc::new(OwnerOnly)),
            post_processor: self
                .post_processor
                .unwrap_or_else(|| Arc::new(NoopPostProcessor)),
            pools,
        };

        let mut assembler = Assembler::new(ctx.clone(), retrier, self.config.spool_dir());
        if let Some(policy) = self.assembly_policy {
            assembler = assembler.with_policy(policy);
        }
        let assembler = Arc::new(assembler);
        let receiver = ChunkReceiver::new(ctx.clone(), Arc::clone(&assembler));

        UploadService {
            config: self.config,
            ctx,
            receiver,
            assembler,
            shutdown,
        }
    }
}

// ---------------------------------------------------------------------------
// UploadService
// ---------------------------------------------------------------------------

/// The upload core as seen by a request handler.
pub struct UploadService {
    config: ServiceConfig,
    ctx: UploadContext,
    receiver: ChunkReceiver,
    assembler: Arc<Assembler>,
    shutdown: CancellationToken,
}

impl UploadService {
    pub fn builder() -> UploadServiceBuilder {
        UploadServiceBuilder::default()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.ctx.storage
    }

    /// Progress tracker, for registering push callbacks.
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.ctx.progress
    }

    /// Declares a new upload and returns its target.
    pub async fn initialize_upload(
        &self,
        owner: Uuid,
        init: InitUpload,
    ) -> Result<UploadTarget, UploadError> {
        validate_file_name(&init.file_name)?;
        if init.total_bytes == 0 {
            return Err(UploadError::Validation(
                "total size must be greater than zero".into(),
            ));
        }
        let chunk_size = init.chunk_size.unwrap_or(self.config.chunk_size);
        if chunk_size == 0 {
            return Err(UploadError::Validation(
                "chunk size must be greater than zero".into(),
            ));
        }
        let total_chunks = u32::try_from(total_chunks_for(init.total_bytes, chunk_size))
            .map_err(|_| {
                UploadError::Validation(format!(
                    "{} bytes in {chunk_size}-byte chunks is too many chunks",
                    init.total_bytes
                ))
            })?;

        let target = UploadTarget::new(
            owner,
            init.file_name,
            init.content_type,
            init.total_bytes,
            chunk_size,
            total_chunks,
        );
        self.ctx.catalog.insert(target.clone()).await?;
        self.ctx
            .progress
            .initialize(target.id, owner, target.total_bytes, total_chunks);
        info!(
            target_id = %target.id,
            %owner,
            file = %target.file_name,
            bytes = target.total_bytes,
            chunks = total_chunks,
            "upload initialized"
        );
        Ok(target)
    }

    pub async fn submit_chunk(
        &self,
        caller: Uuid,
        chunk: ChunkSubmission,
    ) -> Result<ChunkUploadResponse, UploadError> {
        self.receiver.submit_chunk(caller, chunk).await
    }

    pub async fn chunk_progress(
        &self,
        caller: Uuid,
        target_id: Uuid,
    ) -> Result<ChunkProgress, UploadError> {
        self.receiver.chunk_progress(caller, target_id).await
    }

    /// Live progress of a target. FAILED entries carry the error message.
    pub fn progress(&self, target_id: Uuid) -> Result<ProgressSnapshot, UploadError> {
        self.ctx
            .progress
            .observe(target_id)
            .ok_or(UploadError::NotFound(target_id))
    }

    pub async fn target(&self, caller: Uuid, target_id: Uuid) -> Result<UploadTarget, UploadError> {
        self.ctx.authorized_target(caller, target_id).await
    }

    /// Runs assembly for a target inline. Normally triggered by the last
    /// chunk; exposed for operators re-driving a stuck target.
    pub async fn assemble(&self, target_id: Uuid) -> Result<AssemblyOutcome, UploadError> {
        self.assembler.assemble(target_id).await
    }

    /// Issues a pre-signed URL the client can PUT the whole object to.
    pub async fn issue_direct_upload(
        &self,
        caller: Uuid,
        target_id: Uuid,
        ttl: Option<Duration>,
    ) -> Result<DirectUploadGrant, UploadError> {
        let target = self.ctx.authorized_target(caller, target_id).await?;
        if target.status.is_terminal() {
            return Err(UploadError::Validation(format!(
                "upload {target_id} is already {:?}",
                target.status
            )));
        }
        let ttl = ttl.unwrap_or_else(|| self.config.presign_ttl());
        let expires_in = chrono::Duration::from_std(ttl)
            .map_err(|_| UploadError::Validation(format!("URL lifetime {ttl:?} is out of range")))?;

        let key = target.object_key();
        let url = self.ctx.storage.presigned_upload_url(&key, ttl).await?;
        debug!(%target_id, %key, ttl_secs = ttl.as_secs(), "issued direct upload URL");
        Ok(DirectUploadGrant {
            target_id,
            url,
            key,
            expires_at: Utc::now() + expires_in,
        })
    }

    /// Completes a direct upload once the client has PUT the object.
    pub async fn mark_ready(
        &self,
        caller: Uuid,
        target_id: Uuid,
    ) -> Result<AssemblyOutcome, UploadError> {
        let target = self.ctx.authorized_target(caller, target_id).await?;
        self.assembler.finalize_direct_upload(&target).await
    }

    /// Cancels a non-terminal target and drops its chunk fragments.
    pub async fn cancel(&self, caller: Uuid, target_id: Uuid) -> Result<(), UploadError> {
        loop {
            let target = self.ctx.authorized_target(caller, target_id).await?;
            if target.status.is_terminal() {
                return Err(UploadError::Validation(format!(
                    "upload {target_id} is already {:?}",
                    target.status
                )));
            }
            if self
                .ctx
                .catalog
                .transition(target_id, target.status, TargetStatus::Cancelled)
                .await?
            {
                break;
            }
        }

        self.ctx.progress.cancel(target_id);
        for index in self.ctx.ledger.uploaded_indices(target_id).await? {
            if let Err(e) = self.ctx.storage.delete(&chunk_key(target_id, index)).await {
                warn!(%target_id, index, error = %e, "failed to delete chunk fragment");
            }
        }
        self.ctx.ledger.purge(target_id).await?;
        info!(%target_id, "upload cancelled");
        Ok(())
    }

    /// Periodically evicts idle and already-observed progress entries.
    pub fn spawn_progress_eviction(&self) -> JoinHandle<()> {
        self.ctx.progress.spawn_eviction(
            Duration::from_secs(self.config.progress_sweep_interval_secs.max(1)),
            Duration::from_secs(self.config.progress_idle_ttl_secs),
            self.shutdown.child_token(),
        )
    }

    /// Counters of the upload, processing and notify pools.
    pub fn pool_stats(&self) -> [PoolStats; 3] {
        self.ctx.pools.stats()
    }

    /// Waits until every scheduled assembly, post-processing task and
    /// notification has finished.
    pub async fn flush(&self) {
        self.ctx.pools.wait_idle().await;
    }

    /// Interrupts pending backoff waits and drains the pools. Returns `false`
    /// if a pool did not drain within its timeout.
    pub async fn shutdown(&self) -> bool {
        self.shutdown.cancel();
        self.ctx.pools.shutdown().await
    }
}
