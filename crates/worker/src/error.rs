//! Task execution error types.

use thiserror::Error;

/// Everything that can take down one ingestion task.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("file not found in inbox: {0}")]
    NotFoundInInbox(String),

    #[error("invalid {algorithm} checksum for {path}")]
    ChecksumMismatch { algorithm: String, path: String },

    #[error(transparent)]
    Core(#[from] seqvault_core::Error),

    #[error(transparent)]
    Crypt(#[from] seqvault_crypt::CryptError),

    #[error(transparent)]
    Storage(#[from] seqvault_storage::StorageError),

    #[error(transparent)]
    Db(#[from] seqvault_db::DbError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A failed task, carrying the file it belongs to.
#[derive(Debug)]
pub struct TaskFailure {
    pub file_id: i64,
    pub cause: IngestError,
}
