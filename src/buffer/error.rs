use thiserror::Error;

use crate::disk::DiskError;

/// Errors that can occur during buffer pool operations.
///
/// Expected operational failures (pool exhausted, page not resident,
/// pinned-page deletion) are reported as `Ok(None)` / `Ok(false)` sentinels,
/// not errors; only collaborator I/O failures surface here.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Disk error: {0}")]
    Disk(#[from] DiskError),
}

pub type BufferResult<T> = Result<T, BufferError>;
