use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{PoolConfig, SaturationPolicy, WorkerPoolsConfig};

/// Errors returned when a task cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("{pool} pool is saturated")]
    Saturated { pool: String },

    #[error("{pool} pool is shut down")]
    Closed { pool: String },
}

/// How an accepted task was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// Spawned onto the pool; runs in the background.
    Queued,
    /// Pool was full; the submitter already ran it to completion.
    RanInline,
}

/// Queue utilization above which a pool reports itself degraded.
pub const QUEUE_HEALTH_THRESHOLD: f64 = 0.8;

/// Point-in-time counters for one pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub name: String,
    pub workers: usize,
    /// Tasks currently holding a worker.
    pub running: usize,
    /// Admitted tasks waiting for a worker.
    pub queued: usize,
    pub queue_capacity: usize,
    /// Pool tasks finished since creation. Work run on the caller is not counted.
    pub completed: u64,
}

impl PoolStats {
    /// Fraction of the queue in use; `0.0` for a pool without a queue.
    pub fn queue_utilization(&self) -> f64 {
        if self.queue_capacity == 0 {
            return 0.0;
        }
        self.queued as f64 / self.queue_capacity as f64
    }

    pub fn health(&self) -> PoolHealth {
        if self.queue_utilization() > QUEUE_HEALTH_THRESHOLD {
            PoolHealth::Degraded
        } else {
            PoolHealth::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolHealth {
    Healthy,
    /// Queue more than 80% full.
    Degraded,
}

/// A bounded pool of tokio tasks.
///
/// At most `workers` tasks run at once and at most `workers + queue_capacity`
/// are admitted. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    policy: SaturationPolicy,
    slots: Arc<Semaphore>,
    running: Arc<Semaphore>,
    tracker: TaskTracker,
    closed: AtomicBool,
    shutdown_timeout: Duration,
    workers: usize,
    queue_capacity: usize,
    running_count: AtomicUsize,
    completed: AtomicU64,
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .field("in_flight", &self.inner.tracker.len())
            .finish_non_exhaustive()
    }
}

impl TaskPool {
    pub fn new(name: impl Into<String>, config: &PoolConfig) -> Self {
        let workers = config.effective_workers();
        let name = name.into();
        debug!(
            pool = %name,
            workers,
            queue = config.queue_capacity,
            policy = ?config.policy,
            "creating task pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                name,
                policy: config.policy,
                slots: Arc::new(Semaphore::new(workers + config.queue_capacity)),
                running: Arc::new(Semaphore::new(workers)),
                tracker: TaskTracker::new(),
                closed: AtomicBool::new(false),
                shutdown_timeout: config.shutdown_timeout(),
                workers,
                queue_capacity: config.queue_capacity,
                running_count: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Tasks admitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn stats(&self) -> PoolStats {
        let running = self.inner.running_count.load(Ordering::Acquire);
        PoolStats {
            name: self.inner.name.clone(),
            workers: self.inner.workers,
            running,
            queued: self.inner.tracker.len().saturating_sub(running),
            queue_capacity: self.inner.queue_capacity,
            completed: self.inner.completed.load(Ordering::Acquire),
        }
    }

    pub fn health(&self) -> PoolHealth {
        self.stats().health()
    }

    /// Submits `task` according to the pool's saturation policy.
    ///
    /// With [`SaturationPolicy::CallerRuns`] a full pool runs the task inside
    /// this call, so the returned future completes only after the task does.
    pub async fn submit<F>(&self, task: F) -> Result<Submitted, PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed {
                pool: self.inner.name.clone(),
            });
        }

        match Arc::clone(&self.inner.slots).try_acquire_owned() {
            Ok(slot) => {
                let inner = Arc::clone(&self.inner);
                self.inner.tracker.spawn(async move {
                    let _slot = slot;
                    let _permit = Arc::clone(&inner.running).acquire_owned().await;
                    inner.running_count.fetch_add(1, Ordering::AcqRel);
                    task.await;
                    inner.running_count.fetch_sub(1, Ordering::AcqRel);
                    inner.completed.fetch_add(1, Ordering::AcqRel);
                });
                Ok(Submitted::Queued)
            }
            Err(_) => match self.inner.policy {
                SaturationPolicy::CallerRuns => {
                    debug!(pool = %self.inner.name, "pool saturated, running task on caller");
                    task.await;
                    Ok(Submitted::RanInline)
                }
                SaturationPolicy::Abort => {
                    warn!(pool = %self.inner.name, "pool saturated, rejecting task");
                    Err(PoolError::Saturated {
                        pool: self.inner.name.clone(),
                    })
                }
            },
        }
    }

    /// Waits until every admitted task has finished.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        if !self.inner.closed.load(Ordering::Acquire) {
            self.inner.tracker.reopen();
        }
    }

    /// Stops accepting work and waits up to the configured timeout for
    /// admitted tasks. Returns `false` if tasks were still running.
    pub async fn shutdown(&self) -> bool {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.tracker.close();
        let drained = tokio::time::timeout(self.inner.shutdown_timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        if drained {
            info!(pool = %self.inner.name, "task pool drained");
        } else {
            warn!(
                pool = %self.inner.name,
                remaining = self.inner.tracker.len(),
                "task pool shutdown timed out"
            );
        }
        drained
    }
}

/// The three pools used by the upload core.
#[derive(Debug, Clone)]
pub struct WorkerPools {
    pub upload: TaskPool,
    pub notify: TaskPool,
    pub processing: TaskPool,
}

impl WorkerPools {
    pub fn new(config: &WorkerPoolsConfig) -> Self {
        Self {
            upload: TaskPool::new("upload", &config.upload),
            notify: TaskPool::new("notify", &config.notify),
            processing: TaskPool::new("processing", &config.processing),
        }
    }

    /// Waits until all three pools are idle.
    pub async fn wait_idle(&self) {
        self.upload.wait_idle().await;
        self.processing.wait_idle().await;
        self.notify.wait_idle().await;
    }

    pub fn stats(&self) -> [PoolStats; 3] {
        [self.upload.stats(), self.processing.stats(), self.notify.stats()]
    }

    /// Logs the counters of every pool. Returns `false` if any pool is
    /// degraded.
    pub fn log_health(&self) -> bool {
        let mut healthy = true;
        for stats in self.stats() {
            match stats.health() {
                PoolHealth::Healthy => debug!(
                    pool = %stats.name,
                    running = stats.running,
                    queued = stats.queued,
                    capacity = stats.queue_capacity,
                    completed = stats.completed,
                    "pool healthy"
                ),
                PoolHealth::Degraded => {
                    healthy = false;
                    warn!(
                        pool = %stats.name,
                        running = stats.running,
                        queued = stats.queued,
                        capacity = stats.queue_capacity,
                        completed = stats.completed,
                        "pool queue above 80% capacity"
                    );
                }
            }
        }
        healthy
    }

    /// Shuts the pools down in dependency order: upload work may still
    /// schedule processing and notifications.
    pub async fn shutdown(&self) -> bool {
        self.log_health();
        let upload = self.upload.shutdown().await;
        let processing = self.processing.shutdown().await;
        let notify = self.notify.shutdown().await;
        upload && processing && notify
    }
}

impl Default for WorkerPools {
    fn default() -> Self {
        Self::new(&WorkerPoolsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::oneshot;

    use super::*;

    fn config(workers: usize, queue_capacity: usize, policy: SaturationPolicy) -> PoolConfig {
        PoolConfig {
            workers,
            queue_capacity,
            policy,
            shutdown_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn abort_policy_rejects_when_full() {
        let pool = TaskPool::new("notify", &config(1, 0, SaturationPolicy::Abort));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = pool
            .submit(async move {
                let _ = release_rx.await;
            })
            .await;
        assert_eq!(first, Ok(Submitted::Queued));

        let second = pool.submit(async {}).await;
        assert_eq!(
            second,
            Err(PoolError::Saturated {
                pool: "notify".into()
            })
        );

        release_tx.send(()).unwrap();
        pool.wait_idle().await;
        assert_eq!(pool.submit(async {}).await, Ok(Submitted::Queued));
    }

    #[tokio::test]
    async fn caller_runs_policy_executes_inline_when_full() {
        let pool = TaskPool::new("upload", &config(1, 0, SaturationPolicy::CallerRuns));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.submit(async move {
            let _ = release_rx.await;
        })
        .await
        .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let outcome = pool
            .submit(async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await;

        assert_eq!(outcome, Ok(Submitted::RanInline));
        assert!(ran.load(Ordering::SeqCst));
        release_tx.send(()).unwrap();
        pool.wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_workers() {
        let pool = TaskPool::new("processing", &config(2, 10, SaturationPolicy::Abort));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.submit(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        pool.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn stats_flag_a_nearly_full_queue() {
        let pool = TaskPool::new("upload", &config(1, 5, SaturationPolicy::Abort));
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.submit(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        })
        .await
        .unwrap();
        started_rx.await.unwrap();

        for _ in 0..4 {
            pool.submit(async {}).await.unwrap();
        }
        let stats = pool.stats();
        assert_eq!((stats.running, stats.queued), (1, 4));
        assert_eq!(stats.queue_capacity, 5);
        assert_eq!(stats.health(), PoolHealth::Healthy);

        pool.submit(async {}).await.unwrap();
        assert_eq!(pool.stats().queued, 5);
        assert_eq!(pool.health(), PoolHealth::Degraded);

        release_tx.send(()).unwrap();
        pool.wait_idle().await;
        let stats = pool.stats();
        assert_eq!((stats.running, stats.queued, stats.completed), (0, 0, 6));
        assert_eq!(stats.health(), PoolHealth::Healthy);
    }

    #[test]
    fn pool_without_queue_is_healthy() {
        let stats = TaskPool::new("notify", &config(2, 0, SaturationPolicy::Abort)).stats();
        assert_eq!(stats.queue_utilization(), 0.0);
        assert_eq!(stats.health(), PoolHealth::Healthy);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let pool = TaskPool::new("upload", &config(1, 1, SaturationPolicy::CallerRuns));
        pool.submit(async {}).await.unwrap();

        assert!(pool.shutdown().await);
        assert_eq!(
            pool.submit(async {}).await,
            Err(PoolError::Closed {
                pool: "upload".into()
            })
        );
    }
}
