//! Storage abstraction for chunk fragments and assembled objects.
//!
//! A [`StorageBackend`] is picked once from [`StorageConfig`] and used for
//! the whole lifetime of an object. Remote backends are wrapped in
//! [`RetryingBackend`]; local disk I/O is not retried.

mod backends;
mod config;
mod error;
mod retrying;
mod traits;

pub use backends::{LocalBackend, MemoryBackend, S3Backend};
pub use config::{S3Settings, StorageConfig, from_config};
pub use error::{StorageError, StorageResult};
pub use retrying::RetryingBackend;
pub use traits::{ByteStream, ObjectBody, StorageBackend, StorageFuture};
