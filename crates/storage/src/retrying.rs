//! Retry wrapper for remote backends.

use std::sync::Arc;
use std::time::Duration;

use photoloom_retry::{RetryError, RetryPolicy, Retrier};

use crate::error::StorageError;
use crate::traits::{ByteStream, ObjectBody, StorageBackend, StorageFuture};

/// Runs every call on the inner backend under a [`RetryPolicy`].
///
/// Exhausted or aborted calls surface the last backend error unchanged, so a
/// missing key is still reported as [`StorageError::NotFound`].
pub struct RetryingBackend {
    inner: Arc<dyn StorageBackend>,
    policy: RetryPolicy,
    retrier: Retrier,
}

impl RetryingBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            retrier: Retrier::new(),
        }
    }

    /// Replaces the retrier, e.g. with one bound to a shutdown token.
    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    fn operation(&self, op: &str, key: &str) -> String {
        format!("{}:{op}:{key}", self.inner.backend_name())
    }
}

fn unwrap_retry_error(err: RetryError<StorageError>) -> StorageError {
    match err {
        RetryError::Interrupted { operation, .. } => StorageError::Interrupted(operation),
        RetryError::Exhausted { source, .. } | RetryError::Aborted { source, .. } => source,
    }
}

impl StorageBackend for RetryingBackend {
    fn store<'a>(
        &'a self,
        key: &'a str,
        body: ObjectBody,
        content_type: &'a str,
        length: u64,
    ) -> StorageFuture<'a, String> {
        Box::pin(async move {
            self.retrier
                .execute(&self.operation("store", key), &self.policy, || {
                    self.inner.store(key, body.clone(), content_type, length)
                })
                .await
                .map(|done| done.value)
                .map_err(unwrap_retry_error)
        })
    }

    fn retrieve<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ByteStream> {
        Box::pin(async move {
            self.retrier
                .execute(&self.operation("retrieve", key), &self.policy, || {
                    self.inner.retrieve(key)
                })
                .await
                .map(|done| done.value)
                .map_err(unwrap_retry_error)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.retrier
                .execute(&self.operation("delete", key), &self.policy, || {
                    self.inner.delete(key)
                })
                .await
                .map(|done| done.value)
                .map_err(unwrap_retry_error)
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            self.retrier
                .execute(&self.operation("exists", key), &self.policy, || {
                    self.inner.exists(key)
                })
                .await
                .map(|done| done.value)
                .map_err(unwrap_retry_error)
        })
    }

    fn presigned_upload_url<'a>(&'a self, key: &'a str, ttl: Duration) -> StorageFuture<'a, String> {
        self.inner.presigned_upload_url(key, ttl)
    }

    fn presigned_download_url<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
    ) -> StorageFuture<'a, String> {
        self.inner.presigned_download_url(key, ttl)
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::backends::MemoryBackend;

    /// Fails the first `failures` stores with an I/O error.
    struct FlakyBackend {
        inner: MemoryBackend,
        failures: u32,
        calls: AtomicU32,
    }

    impl StorageBackend for FlakyBackend {
        fn store<'a>(
            &'a self,
            key: &'a str,
            body: ObjectBody,
            content_type: &'a str,
            length: u64,
        ) -> StorageFuture<'a, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Box::pin(async move {
                    Err(StorageError::Io(std::io::Error::other("connection reset")))
                });
            }
            self.inner.store(key, body, content_type, length)
        }

        fn retrieve<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ByteStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.retrieve(key)
        }

        fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
            self.inner.delete(key)
        }

        fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool> {
            self.inner.exists(key)
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyBackend> {
        Arc::new(FlakyBackend {
            inner: MemoryBackend::new(),
            failures,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn transient_store_failures_are_retried() {
        let backend = flaky(2);
        let retrying = RetryingBackend::new(backend.clone(), RetryPolicy::aggressive());

        let locator = retrying
            .store("k", Bytes::from_static(b"v").into(), "", 1)
            .await
            .unwrap();

        assert_eq!(locator, "memory://k");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.inner.object("k"), Some(Bytes::from_static(b"v")));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_store_returns_last_error() {
        let backend = flaky(u32::MAX);
        let retrying = RetryingBackend::new(backend.clone(), RetryPolicy::aggressive());

        let err = retrying
            .store("k", Bytes::from_static(b"v").into(), "", 1)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_not_retried() {
        let backend = flaky(0);
        let retrying = RetryingBackend::new(backend.clone(), RetryPolicy::aggressive());

        let result = retrying.retrieve("missing").await;

        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(retrying.backend_name(), "flaky");
    }
}
