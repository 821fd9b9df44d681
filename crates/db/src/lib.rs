//! File and request state machine over a resilient data store handle.
//!
//! This crate provides:
//! - The `StateStore` trait: every persistence operation the pipeline needs
//! - SQLite and PostgreSQL implementations with embedded schemas
//! - Bounded-retry connection establishment with a caller-supplied
//!   failure hook

pub mod error;
pub mod models;
pub mod postgres;
pub mod retry;
pub mod store;

pub use error::{DbError, DbResult};
pub use models::{
    ErrorScope, FileRow, NewFile, NewRequest, ReencryptionArtifacts, RequestContext, Status,
};
pub use postgres::PostgresStore;
pub use retry::{RetryPolicy, connect_with_retry};
pub use store::{SqliteStore, StateStore};

use seqvault_core::config::DbConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a state store from configuration.
///
/// The failure hook fires only when a PostgreSQL connection cannot be
/// established within the configured attempt budget.
pub async fn from_config(
    config: &DbConfig,
    on_failure: impl FnOnce() + Send,
) -> DbResult<Arc<dyn StateStore>> {
    match config {
        DbConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store))
        }
        DbConfig::Postgres {
            host,
            port,
            user,
            password,
            database,
            max_connections,
            connect_attempts,
            connect_interval_secs,
        } => {
            let policy = RetryPolicy {
                attempts: *connect_attempts,
                interval: Duration::from_secs(*connect_interval_secs),
            };
            let store = PostgresStore::connect(
                host,
                *port,
                user,
                password.as_deref(),
                database,
                *max_connections,
                policy,
                on_failure,
            )
            .await?;
            Ok(Arc::new(store))
        }
    }
}
