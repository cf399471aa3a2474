//! Backend selection from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use photoloom_retry::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::backends::{LocalBackend, MemoryBackend, S3Backend};
use crate::error::{StorageError, StorageResult};
use crate::retrying::RetryingBackend;
use crate::traits::StorageBackend;

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Settings {
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Custom endpoint for MinIO and other S3-compatible services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3Settings {
    pub fn validate(&self) -> StorageResult<()> {
        if self.bucket.trim().is_empty() {
            return Err(StorageError::Config("s3 bucket must not be empty".into()));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both accessKeyId and secretAccessKey when either is set".into(),
            ));
        }
        Ok(())
    }
}

/// Which backend stores chunks and assembled objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local { root: PathBuf },
    S3(S3Settings),
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: PathBuf::from("uploads"),
        }
    }
}

/// Builds the configured backend. Remote backends come wrapped in the
/// aggressive retry policy.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Local { root } => Ok(Arc::new(LocalBackend::new(root.clone()).await?)),
        StorageConfig::S3(settings) => {
            let backend = S3Backend::new(settings).await?;
            Ok(Arc::new(RetryingBackend::new(
                Arc::new(backend),
                RetryPolicy::aggressive(),
            )))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_configs() {
        let local: StorageConfig =
            serde_json::from_str(r#"{"type":"local","root":"/var/lib/photoloom"}"#).unwrap();
        assert_eq!(
            local,
            StorageConfig::Local {
                root: PathBuf::from("/var/lib/photoloom")
            }
        );

        let s3: StorageConfig = serde_json::from_str(
            r#"{"type":"s3","bucket":"photos","region":"eu-west-1","forcePathStyle":true}"#,
        )
        .unwrap();
        match s3 {
            StorageConfig::S3(settings) => {
                assert_eq!(settings.bucket, "photos");
                assert!(settings.force_path_style);
                assert!(settings.endpoint.is_none());
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_bucket() {
        let settings = S3Settings {
            bucket: " ".into(),
            region: None,
            endpoint: None,
            prefix: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(matches!(settings.validate(), Err(StorageError::Config(_))));
    }

    #[tokio::test]
    async fn builds_local_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig::Local {
            root: dir.path().join("objects"),
        };
        let backend = from_config(&config).await.unwrap();
        assert_eq!(backend.backend_name(), "local");
        assert!(dir.path().join("objects").is_dir());
    }
}
