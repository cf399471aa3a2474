//! S3-compatible storage backend using the AWS SDK.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::S3Settings;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectBody, StorageBackend, StorageFuture};

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

/// Maps a 404 response to [`StorageError::NotFound`].
fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if is_not_found(&err) {
        return StorageError::NotFound(key.to_string());
    }
    map_s3_operation_error(err)
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == 404
    )
}

/// S3-compatible object store.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Builds a client from `settings`.
    ///
    /// Explicit credentials take precedence; otherwise the ambient AWS
    /// credential chain is used.
    pub async fn new(settings: &S3Settings) -> StorageResult<Self> {
        settings.validate()?;

        let region = settings
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()));

        if let (Some(key_id), Some(secret)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            let credentials = aws_sdk_s3::config::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "photoloom-config",
            );
            builder = builder.credentials_provider(credentials);
        } else {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(region.clone()))
                .load()
                .await;
            builder.set_credentials_provider(shared.credentials_provider());
        }

        if let Some(endpoint) = &settings.endpoint {
            let lower = endpoint.to_ascii_lowercase();
            let endpoint = if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("http://{endpoint}")
            };
            builder = builder.endpoint_url(endpoint);
        }

        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        let prefix = settings
            .prefix
            .as_ref()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        info!(bucket = %settings.bucket, %region, prefix = ?prefix, "S3 storage configured");

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
            prefix,
        })
    }

    /// Object key after applying the configured prefix.
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }
}

impl StorageBackend for S3Backend {
    fn store<'a>(
        &'a self,
        key: &'a str,
        body: ObjectBody,
        content_type: &'a str,
        length: u64,
    ) -> StorageFuture<'a, String> {
        Box::pin(async move {
            let full_key = self.full_key(key);
            let stream = match body {
                ObjectBody::Bytes(data) => S3ByteStream::from(data),
                ObjectBody::File(path) => S3ByteStream::from_path(&path)
                    .await
                    .map_err(|e| StorageError::S3(Box::new(e)))?,
            };

            let mut request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .content_length(length as i64)
                .body(stream);
            if !content_type.is_empty() {
                request = request.content_type(content_type);
            }
            request.send().await.map_err(map_s3_operation_error)?;

            debug!(key = %full_key, length, "stored object in S3");
            Ok(format!("s3://{}/{}", self.bucket, full_key))
        })
    }

    fn retrieve<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ByteStream> {
        Box::pin(async move {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(self.full_key(key))
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;

            let stream = ReaderStream::new(output.body.into_async_read())
                .map(|chunk| chunk.map_err(StorageError::Io));
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            match self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(self.full_key(key))
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(e) if is_not_found(&e) => Ok(()),
                Err(e) => Err(map_s3_operation_error(e)),
            }
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(self.full_key(key))
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(e) if is_not_found(&e) => Ok(false),
                Err(e) => Err(map_s3_operation_error(e)),
            }
        })
    }

    fn presigned_upload_url<'a>(&'a self, key: &'a str, ttl: Duration) -> StorageFuture<'a, String> {
        Box::pin(async move {
            let config = PresigningConfig::expires_in(ttl)
                .map_err(|e| StorageError::Config(format!("invalid presign TTL: {e}")))?;
            let request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(self.full_key(key))
                .presigned(config)
                .await
                .map_err(map_s3_operation_error)?;
            Ok(request.uri().to_string())
        })
    }

    fn presigned_download_url<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
    ) -> StorageFuture<'a, String> {
        Box::pin(async move {
            let config = PresigningConfig::expires_in(ttl)
                .map_err(|e| StorageError::Config(format!("invalid presign TTL: {e}")))?;
            let request = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(self.full_key(key))
                .presigned(config)
                .await
                .map_err(map_s3_operation_error)?;
            Ok(request.uri().to_string())
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
