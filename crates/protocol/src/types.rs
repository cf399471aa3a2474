use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an upload target.
///
/// Status only moves forward: `Uploading -> Processing -> {Completed | Failed}`,
/// with `Cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TargetStatus {
    /// Returns `true` once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if moving from `self` to `next` is a legal forward step.
    pub fn can_transition_to(self, next: TargetStatus) -> bool {
        match (self, next) {
            (Self::Uploading, Self::Processing) => true,
            (Self::Processing, Self::Completed | Self::Failed) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Status of a single chunk record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    Pending,
    Uploaded,
    Failed,
}

/// Chunk-receiver view of a target, derived from the uploaded-chunk count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiverState {
    /// No chunk has landed yet.
    None,
    Receiving,
    ReadyForAssembly,
}

impl ReceiverState {
    pub fn from_counts(uploaded: u32, total: u32) -> Self {
        if uploaded == 0 {
            Self::None
        } else if uploaded >= total {
            Self::ReadyForAssembly
        } else {
            Self::Receiving
        }
    }
}

/// Status string carried by the live progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    Uploading,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Returns `uploaded / total * 100`, or 0 when `total` is 0.
pub fn percentage(uploaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    uploaded as f64 / total as f64 * 100.0
}

/// Point-in-time copy of a target's upload progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub target_id: Uuid,
    pub owner_id: Uuid,
    pub status: ProgressStatus,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub percentage: f64,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome reported for a single chunk submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkUploadStatus {
    /// Chunk stored; more chunks are still missing.
    Uploaded,
    /// Index was already uploaded; nothing was stored or counted.
    Duplicate,
    /// Another submission of this index is still being stored. Resubmit to
    /// learn whether it landed.
    InProgress,
    /// Last missing chunk stored; assembly has been scheduled.
    Completed,
}

/// Response to a chunk submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub target_id: Uuid,
    pub chunk_index: u32,
    pub status: ChunkUploadStatus,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Which chunk indices have landed for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    pub target_id: Uuid,
    pub uploaded_count: u32,
    pub total_chunks: u32,
    pub missing_indices: Vec<u32>,
    pub state: ReceiverState,
}

/// Time-bounded URL a client may PUT the whole object to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadGrant {
    pub target_id: Uuid,
    pub url: String,
    pub key: String,
    pub expires_at: DateTime<Utc>,
}
