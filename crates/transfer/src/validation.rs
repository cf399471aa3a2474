use std::path::{Component, Path};

use crate::chunked::checksum_bytes;
use crate::error::UploadError;
use crate::types::{ChunkSubmission, UploadTarget};

/// Validates a client-supplied file name.
///
/// Rejects:
/// - Empty names
/// - Anything with directory components (`/`, `\`, `..`, drive prefixes)
/// - Control characters
pub fn validate_file_name(file_name: &str) -> Result<(), UploadError> {
    if file_name.trim().is_empty() {
        return Err(UploadError::Validation("file name must not be empty".into()));
    }
    if file_name.contains(['/', '\\']) {
        return Err(UploadError::Validation(format!(
            "file name must not contain path separators: {file_name}"
        )));
    }
    if file_name.chars().any(char::is_control) {
        return Err(UploadError::Validation(
            "file name must not contain control characters".into(),
        ));
    }

    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(UploadError::Validation(format!(
            "file name is not a plain name: {file_name}"
        ))),
    }
}

/// Checks a chunk against its target before anything is written.
pub fn validate_chunk(target: &UploadTarget, chunk: &ChunkSubmission) -> Result<(), UploadError> {
    if chunk.total_chunks != target.total_chunks {
        return Err(UploadError::Validation(format!(
            "declared {} chunks but target expects {}",
            chunk.total_chunks, target.total_chunks
        )));
    }
    if chunk.index >= target.total_chunks {
        return Err(UploadError::Validation(format!(
            "chunk index {} out of range 0..{}",
            chunk.index, target.total_chunks
        )));
    }
    if chunk.data.is_empty() {
        return Err(UploadError::Validation(format!(
            "chunk {} is empty",
            chunk.index
        )));
    }
    let expected = target.expected_chunk_len(chunk.index);
    if chunk.data.len() as u64 != expected {
        return Err(UploadError::Validation(format!(
            "chunk {} is {} bytes, expected {expected}",
            chunk.index,
            chunk.data.len()
        )));
    }
    if let Some(expected) = chunk.checksum.as_deref().filter(|c| !c.is_empty()) {
        let actual = checksum_bytes(&chunk.data);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(UploadError::Validation(format!(
                "checksum mismatch for chunk {}",
                chunk.index
            )));
        }
    }
    Ok(())
}
