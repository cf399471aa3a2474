//! Command-line driver for the photoloom upload core.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures_util::{StreamExt, TryStreamExt};
use photoloom_notify::{NotificationTransport, WebhookTransport};
use photoloom_protocol::{ProgressSnapshot, ProgressStatus};
use photoloom_transfer::{
    ChunkReader, ChunkSubmission, InitUpload, UploadService, UploadTarget,
    calculate_file_checksum,
};
use photoloom_workers::WorkerPools;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "photoloom")]
#[command(about = "Chunked photo upload and assembly")]
#[command(version)]
struct Cli {
    /// Config file path (default: ~/.config/photoloom/config.json)
    #[arg(long, global = true, env = "PHOTOLOOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file in chunks and assemble it into the configured storage
    Upload {
        file: PathBuf,
        /// Owner to upload as (random if omitted)
        #[arg(long)]
        owner: Option<Uuid>,
        /// Chunk size in bytes (overrides config)
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Chunks in flight at once
        #[arg(long, default_value_t = 4)]
        parallel: usize,
    },
    /// Issue a pre-signed URL for an object key
    Presign {
        key: String,
        /// URL lifetime in seconds (default from config)
        #[arg(long)]
        ttl: Option<u64>,
        /// Issue a download URL instead of an upload URL
        #[arg(long, default_value_t = false)]
        download: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,photoloom=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Upload {
            file,
            owner,
            chunk_size,
            parallel,
        } => {
            let shutdown = CancellationToken::new();
            let service = build_service(&config, shutdown.clone()).await?;
            let owner = owner.unwrap_or_else(Uuid::new_v4);
            let _eviction = service.spawn_progress_eviction();

            let result = tokio::select! {
                r = upload(&service, owner, &file, chunk_size, parallel) => r,
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted, shutting down");
                    Err(anyhow::anyhow!("upload interrupted"))
                }
            };
            if !service.shutdown().await {
                warn!("some background work did not finish before shutdown");
            }
            result
        }
        Commands::Presign { key, ttl, download } => {
            let storage = photoloom_storage::from_config(&config.storage)
                .await
                .context("building storage backend")?;
            let ttl = Duration::from_secs(ttl.unwrap_or(config.upload.presign_ttl_secs));
            let url = if download {
                storage.presigned_download_url(&key, ttl).await?
            } else {
                storage.presigned_upload_url(&key, ttl).await?
            };
            println!("{url}");
            Ok(())
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn build_service(config: &CliConfig, shutdown: CancellationToken) -> Result<UploadService> {
    let storage = photoloom_storage::from_config(&config.storage)
        .await
        .context("building storage backend")?;
    let mut builder = UploadService::builder()
        .config(config.upload.clone())
        .storage(storage)
        .pools(WorkerPools::new(&config.pools))
        .shutdown_token(shutdown);

    if let Some(webhook) =
        WebhookTransport::from_config(&config.webhook).context("building webhook transport")?
    {
        builder = builder.transport(Arc::new(webhook) as Arc<dyn NotificationTransport>);
    }
    Ok(builder.build())
}

async fn upload(
    service: &UploadService,
    owner: Uuid,
    file: &Path,
    chunk_size: Option<u64>,
    parallel: usize,
) -> Result<()> {
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("file has no usable name")?
        .to_string();
    let chunk_size = chunk_size.unwrap_or(service.config().chunk_size);
    let reader = ChunkReader::new(file, usize::try_from(chunk_size)?)?;

    let target = service
        .initialize_upload(
            owner,
            InitUpload {
                file_name,
                content_type: guess_content_type(file).into(),
                total_bytes: reader.file_size(),
                chunk_size: Some(chunk_size),
            },
        )
        .await?;
    info!(target_id = %target.id, chunks = target.total_chunks, "upload started");

    service.tracker().on_progress(Box::new(|snapshot: &ProgressSnapshot| {
        if snapshot.status == ProgressStatus::Uploading {
            info!(
                chunks = snapshot.uploaded_chunks,
                total = snapshot.total_chunks,
                "{:.1}%",
                snapshot.percentage
            );
        }
    }));

    let (target_id, total_chunks) = (target.id, target.total_chunks);
    futures_util::stream::iter(reader)
        .map(|chunk| async move {
            let chunk = chunk?;
            service
                .submit_chunk(
                    owner,
                    ChunkSubmission {
                        target_id,
                        index: chunk.index,
                        total_chunks,
                        data: chunk.data,
                        checksum: Some(chunk.checksum),
                    },
                )
                .await
        })
        .buffer_unordered(parallel.max(1))
        .try_collect::<Vec<_>>()
        .await?;

    service.flush().await;

    let snapshot = service.progress(target.id)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    match snapshot.status {
        ProgressStatus::Completed => verify(service, &target, file).await,
        status => bail!(
            "upload ended {status:?}: {}",
            snapshot.error.as_deref().unwrap_or("no error reported")
        ),
    }
}

/// Re-reads the assembled object and compares its digest with the source.
async fn verify(service: &UploadService, target: &UploadTarget, file: &Path) -> Result<()> {
    let expected = calculate_file_checksum(file)?;
    let mut stream = service.storage().retrieve(&target.object_key()).await?;
    let mut hasher = Sha256::new();
    while let Some(bytes) = stream.next().await {
        hasher.update(&bytes?);
    }
    let actual = hex::encode(hasher.finalize());
    if actual != expected {
        bail!("assembled object digest {actual} does not match source {expected}");
    }
    info!(key = %target.object_key(), sha256 = %actual, "assembled object verified");
    Ok(())
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("tif" | "tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}
