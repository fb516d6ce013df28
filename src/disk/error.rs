use std::io;
use thiserror::Error;

use crate::page::PageId;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Invalid page id: {0}")]
    InvalidPageId(PageId),
}

pub type DiskResult<T> = Result<T, DiskError>;
