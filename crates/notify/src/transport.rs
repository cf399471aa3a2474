//! Delivery channels for notification events.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use photoloom_protocol::{NotificationEvent, NotificationEventType};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::NotifyError;

/// Boxed future returned by [`NotificationTransport::deliver`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Sends one event to its destination. Called once per attempt.
pub trait NotificationTransport: Send + Sync {
    fn deliver<'a>(&'a self, event: &'a NotificationEvent) -> TransportFuture<'a>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Writes events to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn deliver<'a>(&'a self, event: &'a NotificationEvent) -> TransportFuture<'a> {
        Box::pin(async move {
            info!(
                target_id = %event.target_id,
                owner_id = %event.owner_id,
                event = event.event_type.as_str(),
                error = event.error.as_deref().unwrap_or(""),
                "upload notification"
            );
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Outbound webhook settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    /// Base URL events are posted under. Webhooks are off when unset.
    pub base_url: Option<String>,
    pub completed_path: String,
    pub failed_path: String,
    /// Sent as a Bearer token when present.
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            completed_path: "/webhook/upload-completed".into(),
            failed_path: "/webhook/upload-failed".into(),
            token: None,
            timeout_secs: 10,
        }
    }
}

/// Posts events as JSON. Any non-2xx answer counts as a failed attempt.
pub struct WebhookTransport {
    http: reqwest::Client,
    base_url: String,
    completed_path: String,
    failed_path: String,
}

impl WebhookTransport {
    /// Builds a transport from `config`. Returns `Ok(None)` when no base URL
    /// is configured.
    pub fn from_config(config: &WebhookConfig) -> Result<Option<Self>, NotifyError> {
        let Some(base_url) = config.base_url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| NotifyError::Rejected("invalid webhook token".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Some(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            completed_path: config.completed_path.clone(),
            failed_path: config.failed_path.clone(),
        }))
    }

    /// Endpoint for an event type.
    pub fn url_for(&self, event_type: NotificationEventType) -> String {
        let path = match event_type {
            NotificationEventType::UploadCompleted => &self.completed_path,
            NotificationEventType::UploadFailed => &self.failed_path,
        };
        format!("{}{}", self.base_url, path)
    }
}

impl NotificationTransport for WebhookTransport {
    fn deliver<'a>(&'a self, event: &'a NotificationEvent) -> TransportFuture<'a> {
        Box::pin(async move {
            let url = self.url_for(event.event_type);
            let resp = self.http.post(&url).json(event).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(NotifyError::Status {
                    url,
                    status: status.as_u16(),
                });
            }
            debug!(%url, target_id = %event.target_id, "webhook delivered");
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
