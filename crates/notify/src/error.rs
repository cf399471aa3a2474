//! Notification error types.

use photoloom_retry::Retryable;

/// Errors produced while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("transport rejected event: {0}")]
    Rejected(String),
}

impl Retryable for NotifyError {
    fn is_retryable(&self) -> bool {
        true
    }
}
