//! Chunked upload receipt, progress tracking and assembly.
//!
//! Clients declare an upload with [`UploadService::initialize_upload`], send
//! fixed-size chunks in any order and in parallel, and poll
//! [`UploadService::progress`]. The submission that completes the set hands
//! the target to the [`Assembler`], which concatenates the fragments into the
//! permanent object and reports the outcome through the notifier.

mod assembler;
mod catalog;
mod chunked;
mod context;
mod error;
mod hooks;
mod ledger;
mod progress;
mod receiver;
mod service;
mod types;
mod validation;

pub use assembler::{Assembler, AssemblyOutcome};
pub use catalog::{MemoryCatalog, TargetCatalog};
pub use chunked::{
    ChunkReader, SourceChunk, calculate_file_checksum, checksum_bytes, total_chunks_for,
};
pub use context::UploadContext;
pub use error::UploadError;
pub use hooks::{AccessPolicy, NoopPostProcessor, OwnerOnly, PostProcessor};
pub use ledger::{ChunkLedger, Claim, MemoryChunkLedger, UploadFuture};
pub use progress::{MemoryProgressStore, ProgressCallback, ProgressStore, ProgressTracker};
pub use receiver::ChunkReceiver;
pub use service::{ServiceConfig, UploadService, UploadServiceBuilder};
pub use types::{ChunkRecord, ChunkSubmission, InitUpload, UploadTarget, chunk_key, object_key};
pub use validation::{validate_chunk, validate_file_name};

/// Default chunk size: 5 MiB, the smallest part size S3 multipart accepts.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
