//! Local filesystem backend.

use std::path::{Component, Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectBody, StorageBackend, StorageFuture};

/// Stores objects as files under a root directory.
///
/// Keys map to relative paths. Writes land in a temp file next to the target
/// and are renamed into place, so readers never observe a partial object.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Creates the backend, creating `root` if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Root directory objects are stored under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `key` to a path under the root, rejecting keys that escape it.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".into()));
        }
        if key.contains('\\') || key.contains('\0') {
            return Err(StorageError::InvalidKey(format!(
                "unsupported character in key: {key}"
            )));
        }
        for component in Path::new(key).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "key must be a plain relative path: {key}"
                    )));
                }
            }
        }
        Ok(self.root.join(key))
    }

    async fn write_atomically(&self, path: &Path, body: ObjectBody) -> StorageResult<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{file_name}.tmp.{}", Uuid::new_v4()));

        let written = match body {
            ObjectBody::Bytes(data) => {
                let mut file = fs::File::create(&temp_path).await?;
                file.write_all(&data).await?;
                file.sync_all().await?;
                data.len() as u64
            }
            ObjectBody::File(source) => {
                let copied = fs::copy(&source, &temp_path).await?;
                fs::File::open(&temp_path).await?.sync_all().await?;
                copied
            }
        };

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(written)
    }

    /// Removes now-empty directories between `path` and the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl StorageBackend for LocalBackend {
    fn store<'a>(
        &'a self,
        key: &'a str,
        body: ObjectBody,
        content_type: &'a str,
        length: u64,
    ) -> StorageFuture<'a, String> {
        Box::pin(async move {
            let path = self.key_path(key)?;
            let written = self.write_atomically(&path, body).await?;
            debug!(key, content_type, written, declared = length, "stored object");
            Ok(path.to_string_lossy().into_owned())
        })
    }

    fn retrieve<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ByteStream> {
        Box::pin(async move {
            let path = self.key_path(key)?;
            let file = match fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(key.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::Io));
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let path = self.key_path(key)?;
            match fs::remove_file(&path).await {
                Ok(()) => {
                    self.prune_empty_parents(&path).await;
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            let path = self.key_path(key)?;
            Ok(fs::try_exists(&path).await?)
        })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tempfile::TempDir;

    use super::*;

    async fn read_all(backend: &LocalBackend, key: &str) -> Vec<u8> {
        let mut stream = backend.retrieve(key).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path()).await.unwrap();

        let locator = backend
            .store("t1/chunks/chunk_0", Bytes::from_static(b"hello").into(), "application/octet-stream", 5)
            .await
            .unwrap();

        assert!(locator.ends_with("chunk_0"));
        assert!(backend.exists("t1/chunks/chunk_0").await.unwrap());
        assert_eq!(read_all(&backend, "t1/chunks/chunk_0").await, b"hello");
    }

    #[tokio::test]
    async fn store_overwrites_existing_object() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path()).await.unwrap();

        backend
            .store("k", Bytes::from_static(b"first").into(), "text/plain", 5)
            .await
            .unwrap();
        backend
            .store("k", Bytes::from_static(b"second").into(), "text/plain", 6)
            .await
            .unwrap();

        assert_eq!(read_all(&backend, "k").await, b"second");
    }

    #[tokio::test]
    async fn store_from_spooled_file() {
        let dir = TempDir::new().unwrap();
        let spool = dir.path().join("spool.bin");
        std::fs::write(&spool, b"assembled bytes").unwrap();
        let backend = LocalBackend::new(dir.path().join("objects")).await.unwrap();

        backend
            .store("owner/object", ObjectBody::File(spool.clone()), "image/jpeg", 15)
            .await
            .unwrap();

        assert_eq!(read_all(&backend, "owner/object").await, b"assembled bytes");
        assert!(spool.exists());
    }

    #[tokio::test]
    async fn retrieve_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path()).await.unwrap();

        let result = backend.retrieve("nope").await;
        assert!(matches!(result, Err(StorageError::NotFound(key)) if key == "nope"));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_directories() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path()).await.unwrap();

        backend
            .store("t1/chunks/chunk_0", Bytes::from_static(b"x").into(), "", 1)
            .await
            .unwrap();
        backend.delete("t1/chunks/chunk_0").await.unwrap();
        backend.delete("t1/chunks/chunk_0").await.unwrap();

        assert!(!backend.exists("t1/chunks/chunk_0").await.unwrap());
        assert!(!dir.path().join("t1").exists());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path()).await.unwrap();

        for key in ["", "../escape", "/etc/passwd", "a/../../b", "./a", "a\\b"] {
            let result = backend.exists(key).await;
            assert!(
                matches!(result, Err(StorageError::InvalidKey(_))),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn presigning_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path()).await.unwrap();

        let result = backend
            .presigned_upload_url("owner/object", Duration::from_secs(60))
            .await;
        assert!(matches!(
            result,
            Err(StorageError::Unsupported { backend: "local", .. })
        ));
    }
}
