//! File storage error types

use thiserror::Error;

use crate::data::error::DataError;

/// Errors from low-level file storage operations
#[derive(Error, Debug)]
pub enum FileStorageError {
    #[error("File not found: {project_id}/{digest}")]
    NotFound { project_id: String, digest: String },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the high-level file service
#[derive(Error, Debug)]
pub enum FileServiceError {
    #[error("Storage error: {0}")]
    Storage(#[from] FileStorageError),

    #[error("Database error: {0}")]
    Database(#[from] DataError),

    #[error("File too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}
