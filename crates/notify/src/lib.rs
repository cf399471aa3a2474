//! Lifecycle notifications for upload targets.
//!
//! [`Notifier`] hands each event to the notification pool and delivers it
//! through a [`NotificationTransport`] under the webhook retry policy.
//! Delivery failures are logged and dropped; they never reach the upload
//! path that raised the event.

mod error;
mod notifier;
mod transport;

pub use error::NotifyError;
pub use notifier::Notifier;
pub use transport::{
    LogTransport, NotificationTransport, TransportFuture, WebhookConfig, WebhookTransport,
};
