//! Upload error types.

use photoloom_retry::Retryable;
use photoloom_storage::StorageError;
use photoloom_workers::PoolError;
use uuid::Uuid;

/// Errors produced by chunk receipt, assembly and the service facade.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload target not found: {0}")]
    NotFound(Uuid),

    #[error("caller {caller} may not access upload target {target}")]
    Forbidden { caller: Uuid, target: Uuid },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("scheduling error: {0}")]
    Scheduling(#[from] PoolError),
}

impl UploadError {
    /// Storage failures that are worth retrying; escalated to
    /// [`UploadError::Assembly`] once the retry budget is spent.
    pub fn is_transient_storage(&self) -> bool {
        matches!(self, UploadError::Storage(e) if e.is_retryable())
    }
}

impl Retryable for UploadError {
    fn is_retryable(&self) -> bool {
        match self {
            UploadError::Storage(e) => e.is_retryable(),
            UploadError::Io(_) => true,
            _ => false,
        }
    }
}
