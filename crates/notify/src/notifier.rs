use std::sync::Arc;

use photoloom_protocol::NotificationEvent;
use photoloom_retry::{RetryPolicy, Retrier};
use photoloom_workers::TaskPool;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::transport::NotificationTransport;

/// Fire-and-forget notification dispatcher.
///
/// Each event runs as its own task on the notification pool and is retried
/// under the webhook policy. A saturated pool or an exhausted retry budget is
/// logged and the event is dropped.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn NotificationTransport>,
    pool: TaskPool,
    policy: RetryPolicy,
    retrier: Retrier,
}

impl Notifier {
    pub fn new(transport: Arc<dyn NotificationTransport>, pool: TaskPool) -> Self {
        Self {
            transport,
            pool,
            policy: RetryPolicy::webhook(),
            retrier: Retrier::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    /// Announces a successfully assembled and persisted object.
    pub async fn upload_completed(&self, target_id: Uuid, owner_id: Uuid) -> bool {
        self.notify(NotificationEvent::completed(target_id, owner_id))
            .await
    }

    /// Announces a target that ended in FAILED.
    pub async fn upload_failed(&self, target_id: Uuid, owner_id: Uuid, error: &str) -> bool {
        self.notify(NotificationEvent::failed(target_id, owner_id, error))
            .await
    }

    /// Queues `event` for delivery. Returns `false` if the pool refused it.
    pub async fn notify(&self, event: NotificationEvent) -> bool {
        let transport = Arc::clone(&self.transport);
        let retrier = self.retrier.clone();
        let policy = self.policy.clone();
        let target_id = event.target_id;

        let task = async move {
            deliver(transport.as_ref(), &retrier, &policy, &event).await;
        };

        match self.pool.submit(task).await {
            Ok(_) => true,
            Err(e) => {
                warn!(%target_id, error = %e, "notification dropped");
                false
            }
        }
    }

    /// Waits for every queued notification to finish.
    pub async fn flush(&self) {
        self.pool.wait_idle().await;
    }
}

async fn deliver(
    transport: &dyn NotificationTransport,
    retrier: &Retrier,
    policy: &RetryPolicy,
    event: &NotificationEvent,
) {
    let operation = format!("notify:{}:{}", event.event_type.as_str(), event.target_id);
    let result = retrier
        .execute_with_callback(
            &operation,
            policy,
            || transport.deliver(event),
            |ctx, delay, err| {
                warn!(
                    transport = transport.name(),
                    target_id = %event.target_id,
                    attempt = ctx.attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "notification attempt failed"
                );
            },
        )
        .await;

    match result {
        Ok(done) => debug!(
            transport = transport.name(),
            target_id = %event.target_id,
            attempts = done.attempts,
            "notification delivered"
        ),
        Err(e) => error!(
            transport = transport.name(),
            target_id = %event.target_id,
            error = %e,
            "notification failed, giving up"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use photoloom_protocol::NotificationEventType;
    use photoloom_workers::{PoolConfig, SaturationPolicy};

    use super::*;
    use crate::error::NotifyError;
    use crate::transport::TransportFuture;

    /// Records every delivery attempt and fails the first `failures`.
    struct RecordingTransport {
        failures: u32,
        attempts: AtomicU32,
        delivered: Mutex<Vec<NotificationEvent>>,
    }

    impl RecordingTransport {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    impl NotificationTransport for RecordingTransport {
        fn deliver<'a>(&'a self, event: &'a NotificationEvent) -> TransportFuture<'a> {
            Box::pin(async move {
                let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= self.failures {
                    return Err(NotifyError::Rejected(format!("attempt {n}")));
                }
                self.delivered.lock().unwrap().push(event.clone());
                Ok(())
            })
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn pool() -> TaskPool {
        TaskPool::new(
            "notify",
            &PoolConfig {
                workers: 2,
                queue_capacity: 4,
                policy: SaturationPolicy::Abort,
                shutdown_timeout_secs: 1,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_after_transient_failures() {
        let transport = RecordingTransport::new(2);
        let notifier = Notifier::new(transport.clone(), pool());

        let target = Uuid::new_v4();
        let owner = Uuid::new_v4();
        assert!(notifier.upload_completed(target, owner).await);
        notifier.flush().await;

        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].target_id, target);
        assert_eq!(delivered[0].event_type, NotificationEventType::UploadCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_delivery_is_swallowed() {
        let transport = RecordingTransport::new(u32::MAX);
        let notifier = Notifier::new(transport.clone(), pool());

        assert!(
            notifier
                .upload_failed(Uuid::new_v4(), Uuid::new_v4(), "store failed")
                .await
        );
        notifier.flush().await;

        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert!(transport.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn saturated_pool_drops_event() {
        let transport = RecordingTransport::new(0);
        let tiny = TaskPool::new(
            "notify",
            &PoolConfig {
                workers: 1,
                queue_capacity: 0,
                policy: SaturationPolicy::Abort,
                shutdown_timeout_secs: 1,
            },
        );
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        tiny.submit(async move {
            let _ = release_rx.await;
        })
        .await
        .unwrap();

        let notifier = Notifier::new(transport.clone(), tiny);
        assert!(!notifier.upload_completed(Uuid::new_v4(), Uuid::new_v4()).await);

        release_tx.send(()).unwrap();
        notifier.flush().await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    }
}
