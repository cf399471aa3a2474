//! Outbound notification payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of lifecycle event announced to external listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEventType {
    UploadCompleted,
    UploadFailed,
}

impl NotificationEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UploadCompleted => "UPLOAD_COMPLETED",
            Self::UploadFailed => "UPLOAD_FAILED",
        }
    }
}

/// A single lifecycle event for an upload target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub target_id: Uuid,
    pub owner_id: Uuid,
    pub event_type: NotificationEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationEvent {
    pub fn completed(target_id: Uuid, owner_id: Uuid) -> Self {
        Self {
            target_id,
            owner_id,
            event_type: NotificationEventType::UploadCompleted,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(target_id: Uuid, owner_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            target_id,
            owner_id,
            event_type: NotificationEventType::UploadFailed,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_event_carries_error_text() {
        let event = NotificationEvent::failed(Uuid::new_v4(), Uuid::new_v4(), "disk full");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "UPLOAD_FAILED");
        assert_eq!(json["error"], "disk full");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn completed_event_has_no_error_field() {
        let event = NotificationEvent::completed(Uuid::new_v4(), Uuid::new_v4());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "UPLOAD_COMPLETED");
        assert!(json.get("error").is_none());
    }
}
