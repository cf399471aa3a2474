use bytes::Bytes;
use chrono::{DateTime, Utc};
use photoloom_protocol::{ChunkStatus, TargetStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The logical object being uploaded and assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub total_bytes: u64,
    /// Size of every chunk except possibly the last.
    pub chunk_size: u64,
    /// Fixed when the target is created.
    pub total_chunks: u32,
    pub status: TargetStatus,
    pub created_at: DateTime<Utc>,
}

impl UploadTarget {
    pub fn new(
        owner_id: Uuid,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        total_bytes: u64,
        chunk_size: u64,
        total_chunks: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            file_name: file_name.into(),
            content_type: content_type.into(),
            total_bytes,
            chunk_size,
            total_chunks,
            status: TargetStatus::Uploading,
            created_at: Utc::now(),
        }
    }

    /// Byte length chunk `index` must have: `chunk_size` for all but the
    /// last, which carries the remainder.
    pub fn expected_chunk_len(&self, index: u32) -> u64 {
        let before = u64::from(index) * self.chunk_size;
        if index + 1 == self.total_chunks {
            self.total_bytes.saturating_sub(before)
        } else {
            self.chunk_size
        }
    }

    /// Permanent key of the assembled object.
    pub fn object_key(&self) -> String {
        object_key(self.owner_id, self.id)
    }
}

/// One received fragment of an upload target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub target_id: Uuid,
    pub index: u32,
    pub size: u64,
    /// SHA-256 hex digest of the chunk bytes.
    pub checksum: String,
    pub received_at: DateTime<Utc>,
    pub status: ChunkStatus,
    pub retry_count: u32,
}

impl ChunkRecord {
    pub fn pending(target_id: Uuid, index: u32, size: u64, checksum: String) -> Self {
        Self {
            target_id,
            index,
            size,
            checksum,
            received_at: Utc::now(),
            status: ChunkStatus::Pending,
            retry_count: 0,
        }
    }

    pub fn key(&self) -> String {
        chunk_key(self.target_id, self.index)
    }
}

/// Parameters for declaring a new upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUpload {
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub total_bytes: u64,
    /// Overrides the configured chunk size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
}

fn default_content_type() -> String {
    "application/octet-stream".into()
}

/// One chunk as handed to the receiver.
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub target_id: Uuid,
    pub index: u32,
    pub total_chunks: u32,
    pub data: Bytes,
    /// Client-computed SHA-256 hex digest; computed server-side when absent.
    pub checksum: Option<String>,
}

/// Storage key of a chunk fragment.
pub fn chunk_key(target_id: Uuid, index: u32) -> String {
    format!("{target_id}/chunks/chunk_{index}")
}

/// Storage key of an assembled object.
pub fn object_key(owner_id: Uuid, target_id: Uuid) -> String {
    format!("{owner_id}/{target_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let target = Uuid::parse_str("6f1c9d2e-8a41-4f0b-9b6e-2d5c7a3e1f90").unwrap();
        let owner = Uuid::parse_str("0b7e4a1c-3d2f-4e5a-8b9c-1d2e3f4a5b6c").unwrap();
        assert_eq!(
            chunk_key(target, 3),
            "6f1c9d2e-8a41-4f0b-9b6e-2d5c7a3e1f90/chunks/chunk_3"
        );
        assert_eq!(
            object_key(owner, target),
            "0b7e4a1c-3d2f-4e5a-8b9c-1d2e3f4a5b6c/6f1c9d2e-8a41-4f0b-9b6e-2d5c7a3e1f90"
        );
    }

    #[test]
    fn new_target_starts_uploading() {
        let target = UploadTarget::new(Uuid::new_v4(), "cat.jpg", "image/jpeg", 300, 100, 3);
        assert_eq!(target.status, TargetStatus::Uploading);
        assert_eq!(target.object_key(), object_key(target.owner_id, target.id));
    }

    #[test]
    fn last_chunk_carries_the_remainder() {
        let target = UploadTarget::new(Uuid::new_v4(), "cat.jpg", "image/jpeg", 250, 100, 3);
        assert_eq!(target.expected_chunk_len(0), 100);
        assert_eq!(target.expected_chunk_len(1), 100);
        assert_eq!(target.expected_chunk_len(2), 50);

        let single = UploadTarget::new(Uuid::new_v4(), "cat.jpg", "image/jpeg", 7, 100, 1);
        assert_eq!(single.expected_chunk_len(0), 7);
    }

    #[test]
    fn init_upload_defaults_content_type() {
        let init: InitUpload =
            serde_json::from_str(r#"{"fileName":"a.png","totalBytes":10}"#).unwrap();
        assert_eq!(init.content_type, "application/octet-stream");
        assert!(init.chunk_size.is_none());
    }
}
