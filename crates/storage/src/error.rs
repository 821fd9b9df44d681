//! Storage error types.

use thiserror::Error;

/// Errors raised by vault backends and the mover.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
