//! Bounded worker pools for fire-and-forget work.
//!
//! Three pools back the upload core:
//! - `upload`: chunk receipt and assembly, large queue, caller runs on saturation.
//! - `notify`: outbound notifications, small queue, rejects on saturation.
//! - `processing`: post-assembly enrichment, sized to available cores.

mod config;
mod pool;

pub use config::{PoolConfig, SaturationPolicy, WorkerPoolsConfig};
pub use pool::{
    PoolError, PoolHealth, PoolStats, QUEUE_HEALTH_THRESHOLD, Submitted, TaskPool, WorkerPools,
};
