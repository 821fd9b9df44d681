//! Codec error types.

use thiserror::Error;

/// Errors raised by the header codec and segment crypto.
///
/// None of these are retried: they indicate either corrupted archive state
/// or a client error, both requiring caller intervention.
#[derive(Debug, Error)]
pub enum CryptError {
    #[error("invalid container format: {0}")]
    InvalidContainerFormat(String),

    #[error("no header packet decryptable with the supplied key")]
    UnauthorizedHeader,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("sealing failure: {0}")]
    Seal(String),

    #[error("segment decryption failure: {0}")]
    Segment(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for codec operations.
pub type CryptResult<T> = std::result::Result<T, CryptError>;
