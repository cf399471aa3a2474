//! Upload target metadata.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use photoloom_protocol::TargetStatus;
use tracing::debug;
use uuid::Uuid;

use crate::ledger::UploadFuture;
use crate::types::UploadTarget;

/// Store of [`UploadTarget`]s.
///
/// Status changes go through [`transition`](TargetCatalog::transition), a
/// compare-and-swap, so racing callers cannot both move the same target.
pub trait TargetCatalog: Send + Sync {
    fn insert(&self, target: UploadTarget) -> UploadFuture<'_, ()>;

    fn get(&self, target_id: Uuid) -> UploadFuture<'_, Option<UploadTarget>>;

    /// Moves the target from `from` to `to` if it is currently in `from` and
    /// the step is legal. Returns `false` otherwise.
    fn transition(
        &self,
        target_id: Uuid,
        from: TargetStatus,
        to: TargetStatus,
    ) -> UploadFuture<'_, bool>;
}

#[derive(Default)]
pub struct MemoryCatalog {
    targets: RwLock<HashMap<Uuid, UploadTarget>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TargetCatalog for MemoryCatalog {
    fn insert(&self, target: UploadTarget) -> UploadFuture<'_, ()> {
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        targets.insert(target.id, target);
        Box::pin(async { Ok(()) })
    }

    fn get(&self, target_id: Uuid) -> UploadFuture<'_, Option<UploadTarget>> {
        let target = self
            .targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target_id)
            .cloned();
        Box::pin(async move { Ok(target) })
    }

    fn transition(
        &self,
        target_id: Uuid,
        from: TargetStatus,
        to: TargetStatus,
    ) -> UploadFuture<'_, bool> {
        let moved = {
            let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
            match targets.get_mut(&target_id) {
                Some(target) if target.status == from && from.can_transition_to(to) => {
                    target.status = to;
                    true
                }
                Some(target) => {
                    debug!(%target_id, current = ?target.status, ?from, ?to, "status transition refused");
                    false
                }
                None => false,
            }
        };
        Box::pin(async move { Ok(moved) })
    }
}
