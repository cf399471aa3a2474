//! Wire types shared by the photoloom upload core and its clients.
//!
//! Everything here serializes with camelCase field names and
//! SCREAMING_SNAKE_CASE enum values so HTTP and push clients can consume the
//! same JSON.

pub mod events;
pub mod types;

pub use events::{NotificationEvent, NotificationEventType};
pub use types::{
    ChunkProgress, ChunkStatus, ChunkUploadResponse, ChunkUploadStatus, DirectUploadGrant,
    ProgressSnapshot, ProgressStatus, ReceiverState, TargetStatus, percentage,
};
