//! The storage backend contract.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;

use crate::error::{StorageError, StorageResult};

/// Streaming object body returned by [`StorageBackend::retrieve`].
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Boxed future returned by every backend operation.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = StorageResult<T>> + Send + 'a>>;

/// Bytes handed to [`StorageBackend::store`].
///
/// A spooled file can be re-read for every attempt, so a retried store never
/// has to hold a whole assembled object in memory.
#[derive(Debug, Clone)]
pub enum ObjectBody {
    Bytes(Bytes),
    File(PathBuf),
}

impl ObjectBody {
    /// Loads the body into memory.
    pub async fn into_bytes(self) -> StorageResult<Bytes> {
        match self {
            ObjectBody::Bytes(bytes) => Ok(bytes),
            ObjectBody::File(path) => Ok(Bytes::from(tokio::fs::read(&path).await?)),
        }
    }
}

impl From<Bytes> for ObjectBody {
    fn from(bytes: Bytes) -> Self {
        ObjectBody::Bytes(bytes)
    }
}

/// A key/value object store for chunk fragments and assembled objects.
///
/// Calls for different keys may run concurrently. Concurrent writes to the
/// same key are last-writer-wins.
pub trait StorageBackend: Send + Sync {
    /// Writes `body` under `key`, replacing any existing object, and returns
    /// an opaque locator for the stored object.
    fn store<'a>(
        &'a self,
        key: &'a str,
        body: ObjectBody,
        content_type: &'a str,
        length: u64,
    ) -> StorageFuture<'a, String>;

    /// Opens the object under `key`. Fails with [`StorageError::NotFound`]
    /// when absent.
    fn retrieve<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ByteStream>;

    /// Removes the object under `key`. Removing an absent key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;

    /// Returns `true` if an object exists under `key`.
    fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool>;

    /// Issues a time-bounded URL a client can PUT the object to directly.
    fn presigned_upload_url<'a>(&'a self, key: &'a str, ttl: Duration) -> StorageFuture<'a, String> {
        let _ = (key, ttl);
        let backend = self.backend_name();
        Box::pin(async move {
            Err(StorageError::Unsupported {
                backend,
                operation: "presigned upload URLs",
            })
        })
    }

    /// Issues a time-bounded URL a client can GET the object from directly.
    fn presigned_download_url<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
    ) -> StorageFuture<'a, String> {
        let _ = (key, ttl);
        let backend = self.backend_name();
        Box::pin(async move {
            Err(StorageError::Unsupported {
                backend,
                operation: "presigned download URLs",
            })
        })
    }

    /// Short name used in logs and errors.
    fn backend_name(&self) -> &'static str;
}
