//! Extension points owned by the surrounding application.

use uuid::Uuid;

use crate::ledger::UploadFuture;
use crate::types::UploadTarget;

/// Decides whether `caller` may act on a target.
pub trait AccessPolicy: Send + Sync {
    fn can_access(&self, caller: Uuid, target: &UploadTarget) -> bool;
}

/// Only the owner may touch its targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOnly;

impl AccessPolicy for OwnerOnly {
    fn can_access(&self, caller: Uuid, target: &UploadTarget) -> bool {
        caller == target.owner_id
    }
}

/// Enrichment run after an object is persisted (metadata extraction,
/// thumbnails). Failures are logged and never revert completion.
pub trait PostProcessor: Send + Sync {
    fn process<'a>(&'a self, target: &'a UploadTarget, key: &'a str) -> UploadFuture<'a, ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPostProcessor;

impl PostProcessor for NoopPostProcessor {
    fn process<'a>(&'a self, _target: &'a UploadTarget, _key: &'a str) -> UploadFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_only_checks_owner() {
        let owner = Uuid::new_v4();
        let target = UploadTarget::new(owner, "a.jpg", "image/jpeg", 1, 1, 1);
        assert!(OwnerOnly.can_access(owner, &target));
        assert!(!OwnerOnly.can_access(Uuid::new_v4(), &target));
    }
}
