use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens when a pool has no free slot for a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// The submitting task runs the work itself, slowing the producer down.
    CallerRuns,
    /// The task is rejected with [`PoolError::Saturated`](crate::PoolError).
    Abort,
}

/// Sizing for one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Tasks allowed to run at once. `0` means one per available core.
    pub workers: usize,
    /// Tasks allowed to wait for a worker.
    pub queue_capacity: usize,
    pub policy: SaturationPolicy,
    /// How long shutdown waits for queued and running tasks.
    pub shutdown_timeout_secs: u64,
}

impl PoolConfig {
    pub fn upload() -> Self {
        Self {
            workers: 100,
            queue_capacity: 500,
            policy: SaturationPolicy::CallerRuns,
            shutdown_timeout_secs: 120,
        }
    }

    pub fn notify() -> Self {
        Self {
            workers: 20,
            queue_capacity: 100,
            policy: SaturationPolicy::Abort,
            shutdown_timeout_secs: 30,
        }
    }

    pub fn processing() -> Self {
        Self {
            workers: 0,
            queue_capacity: 200,
            policy: SaturationPolicy::CallerRuns,
            shutdown_timeout_secs: 180,
        }
    }

    /// Worker count with `0` resolved to the number of available cores.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Sizing for all three pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerPoolsConfig {
    pub upload: PoolConfig,
    pub notify: PoolConfig,
    pub processing: PoolConfig,
}

impl Default for WorkerPoolsConfig {
    fn default() -> Self {
        Self {
            upload: PoolConfig::upload(),
            notify: PoolConfig::notify(),
            processing: PoolConfig::processing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pool_roles() {
        let config = WorkerPoolsConfig::default();
        assert_eq!(config.upload.policy, SaturationPolicy::CallerRuns);
        assert_eq!(config.notify.policy, SaturationPolicy::Abort);
        assert_eq!(config.processing.policy, SaturationPolicy::CallerRuns);
        assert!(config.processing.effective_workers() >= 1);
        assert_eq!(config.upload.effective_workers(), 100);
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: WorkerPoolsConfig = serde_json::from_str(
            r#"{"notify":{"workers":2,"queueCapacity":4,"policy":"abort","shutdownTimeoutSecs":5}}"#,
        )
        .unwrap();
        assert_eq!(config.notify.workers, 2);
        assert_eq!(config.notify.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.upload, PoolConfig::upload());
    }
}
