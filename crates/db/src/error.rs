//! Data store error types.

use thiserror::Error;

/// Data store operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad credentials or connection parameters. Retrying cannot help, so
    /// this class short-circuits the retry loop.
    #[error("bad store parameters: {0}")]
    BadParameters(String),

    /// The store stayed unreachable through the whole attempt budget.
    #[error("store unavailable after {attempts} attempts")]
    Unavailable { attempts: u32 },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for store operations.
pub type DbResult<T> = std::result::Result<T, DbError>;
