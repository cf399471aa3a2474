use std::sync::Arc;

use photoloom_notify::Notifier;
use photoloom_storage::StorageBackend;
use photoloom_workers::WorkerPools;
use uuid::Uuid;

use crate::catalog::TargetCatalog;
use crate::error::UploadError;
use crate::hooks::{AccessPolicy, PostProcessor};
use crate::ledger::ChunkLedger;
use crate::progress::ProgressTracker;
use crate::types::UploadTarget;

/// Collaborators shared by the receiver, the assembler and the service.
#[derive(Clone)]
pub struct UploadContext {
    pub catalog: Arc<dyn TargetCatalog>,
    pub ledger: Arc<dyn ChunkLedger>,
    pub storage: Arc<dyn StorageBackend>,
    pub progress: Arc<ProgressTracker>,
    pub notifier: Notifier,
    pub access: Arc<dyn AccessPolicy>,
    pub post_processor: Arc<dyn PostProcessor>,
    pub pools: WorkerPools,
}

impl UploadContext {
    /// Loads a target and checks that `caller` may act on it.
    pub async fn authorized_target(
        &self,
        caller: Uuid,
        target_id: Uuid,
    ) -> Result<UploadTarget, UploadError> {
        let target = self
            .catalog
            .get(target_id)
            .await?
            .ok_or(UploadError::NotFound(target_id))?;
        if !self.access.can_access(caller, &target) {
            return Err(UploadError::Forbidden {
                caller,
                target: target_id,
            });
        }
        Ok(target)
    }
}
