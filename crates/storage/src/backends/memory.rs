//! Process-local in-memory backend for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;

use crate::error::StorageError;
use crate::traits::{ByteStream, ObjectBody, StorageBackend, StorageFuture};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// Keeps every object in a `HashMap`. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<String, StoredObject>>,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the object under `key`.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects.get(key).map(|o| o.data.clone())
    }

    /// Returns the content type recorded for `key`.
    pub fn content_type(&self, key: &str) -> Option<String> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects.get(key).map(|o| o.content_type.clone())
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of successful `store` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl StorageBackend for MemoryBackend {
    fn store<'a>(
        &'a self,
        key: &'a str,
        body: ObjectBody,
        content_type: &'a str,
        _length: u64,
    ) -> StorageFuture<'a, String> {
        Box::pin(async move {
            let data = body.into_bytes().await?;
            let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
            objects.insert(
                key.to_string(),
                StoredObject {
                    data,
                    content_type: content_type.to_string(),
                },
            );
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(format!("memory://{key}"))
        })
    }

    fn retrieve<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ByteStream> {
        Box::pin(async move {
            let data = self
                .object(key)
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
            let stream = futures_util::stream::iter([Ok::<_, StorageError>(data)]);
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
            objects.remove(key);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(async move { Ok(self.object(key).is_some()) })
    }

    fn presigned_upload_url<'a>(&'a self, key: &'a str, ttl: Duration) -> StorageFuture<'a, String> {
        Box::pin(async move { Ok(format!("memory://{key}?expires_in={}", ttl.as_secs())) })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn store_retrieve_delete() {
        let backend = MemoryBackend::new();
        backend
            .store("a/b", Bytes::from_static(b"data").into(), "image/png", 4)
            .await
            .unwrap();

        assert!(backend.exists("a/b").await.unwrap());
        assert_eq!(backend.content_type("a/b").as_deref(), Some("image/png"));
        let mut stream = backend.retrieve("a/b").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"data"));

        backend.delete("a/b").await.unwrap();
        backend.delete("a/b").await.unwrap();
        assert!(!backend.exists("a/b").await.unwrap());
        assert!(matches!(
            backend.retrieve("a/b").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(backend.write_count(), 1);
    }
}
