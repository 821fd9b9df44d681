//! State store trait and the SQLite implementation.

use crate::error::{DbError, DbResult};
use crate::models::{
    ErrorScope, FileRow, NewFile, NewRequest, ReencryptionArtifacts, RequestContext, Status,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// SQLite schema (embedded).
const SQLITE_SCHEMA: &str = include_str!("sqlite_schema.sql");

/// Every persistence operation the pipeline consumes.
///
/// Each mutation is a single atomic statement keyed by file or request id;
/// no cross-row locking is required.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Cheap liveness probe.
    async fn ping(&self) -> DbResult<()>;

    /// Register a submission; re-registration resets its creation time.
    async fn register_submission(&self, submission_id: &str, user_id: &str) -> DbResult<()>;

    /// Register a file under a submission, returning its id.
    ///
    /// Re-registration of the same `(submission_id, filename)` is an upsert
    /// that resets the status to `Received`, the creation time, and any
    /// re-encryption artifacts from a previous archival.
    async fn register_file(&self, file: &NewFile<'_>) -> DbResult<i64>;

    /// Fetch a file row.
    async fn get_file(&self, file_id: i64) -> DbResult<FileRow>;

    /// Advance a file's status.
    ///
    /// Claims (`InProgress`) are idempotent no-ops once the file is past
    /// that state; `Archived` is only reachable from `In progress`.
    async fn update_status(&self, file_id: i64, status: Status) -> DbResult<()>;

    /// Attach re-encryption artifacts; valid once per archival.
    async fn set_reencryption(
        &self,
        file_id: i64,
        artifacts: &ReencryptionArtifacts,
    ) -> DbResult<()>;

    /// Attach the stable id; valid once, idempotent for the same value.
    async fn set_stable_id(&self, file_id: i64, stable_id: &str) -> DbResult<()>;

    /// Append an error record. Never changes any status by itself.
    async fn register_error(&self, scope: ErrorScope, msg: &str) -> DbResult<()>;

    /// Create a download request for a stable id, resolving the stored
    /// header and vault coordinates.
    async fn make_request(&self, request: &NewRequest) -> DbResult<RequestContext>;

    /// Terminal success write for a download request.
    async fn download_complete(&self, request_id: i64, dl_size: i64, speed: f64) -> DbResult<()>;

    /// Terminal failure write for a download request, plus an error record.
    async fn download_error(&self, request_id: i64, msg: &str) -> DbResult<()>;
}

pub(crate) fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// SQLite-based state store, used by tests and single-node deployments.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, applying the schema.
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DbError::Internal(e.to_string()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(DbError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids "database is locked" failures under concurrent tasks.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        sqlx::raw_sql(SQLITE_SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn current_status(&self, file_id: i64) -> DbResult<String> {
        sqlx::query_scalar::<_, String>("SELECT status FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("file id {file_id}")))
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn register_submission(&self, submission_id: &str, user_id: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO submissions (id, user_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET created_at = excluded.created_at",
        )
        .bind(submission_id)
        .bind(user_id)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn register_file(&self, file: &NewFile<'_>) -> DbResult<i64> {
        let now = OffsetDateTime::now_utc();
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO files (
                submission_id, filename, enc_checksum, enc_checksum_algo,
                org_checksum, org_checksum_algo, status, created_at, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (submission_id, filename) DO UPDATE SET
                enc_checksum = excluded.enc_checksum,
                enc_checksum_algo = excluded.enc_checksum_algo,
                org_checksum = excluded.org_checksum,
                org_checksum_algo = excluded.org_checksum_algo,
                status = excluded.status,
                reenc_header = NULL,
                reenc_key = NULL,
                vault_path = NULL,
                vault_kind = NULL,
                created_at = excluded.created_at,
                last_modified = excluded.last_modified
            RETURNING id
            "#,
        )
        .bind(file.submission_id)
        .bind(file.filename)
        .bind(file.enc_checksum)
        .bind(file.enc_checksum_algo)
        .bind(file.org_checksum)
        .bind(file.org_checksum_algo)
        .bind(Status::Received.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_file(&self, file_id: i64) -> DbResult<FileRow> {
        sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("file id {file_id}")))
    }

    async fn update_status(&self, file_id: i64, status: Status) -> DbResult<()> {
        let query = match status {
            Status::InProgress => {
                "UPDATE files SET status = ?, last_modified = ? \
                 WHERE id = ? AND status IN ('Received', 'In progress')"
            }
            Status::Archived => {
                "UPDATE files SET status = ?, last_modified = ? \
                 WHERE id = ? AND status = 'In progress'"
            }
            Status::Received | Status::Error => {
                "UPDATE files SET status = ?, last_modified = ? WHERE id = ?"
            }
        };
        let result = sqlx::query(query)
            .bind(status.as_str())
            .bind(OffsetDateTime::now_utc())
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            let current = self.current_status(file_id).await?;
            return match status {
                // Claim past this state: idempotent no-op.
                Status::InProgress => Ok(()),
                _ => Err(DbError::InvalidStateTransition {
                    from: current,
                    to: status.as_str().to_string(),
                }),
            };
        }
        Ok(())
    }

    async fn set_reencryption(
        &self,
        file_id: i64,
        artifacts: &ReencryptionArtifacts,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE files SET reenc_header = ?, reenc_key = ?, vault_path = ?, \
             vault_kind = ?, last_modified = ? WHERE id = ? AND reenc_header IS NULL",
        )
        .bind(&artifacts.header_hex)
        .bind(&artifacts.key_hex)
        .bind(&artifacts.vault_path)
        .bind(&artifacts.vault_kind)
        .bind(OffsetDateTime::now_utc())
        .bind(file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.current_status(file_id).await?;
            return Err(DbError::Internal(format!(
                "re-encryption artifacts already attached to file {file_id}"
            )));
        }
        Ok(())
    }

    async fn set_stable_id(&self, file_id: i64, stable_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE files SET stable_id = ?, last_modified = ? \
             WHERE id = ? AND (stable_id IS NULL OR stable_id = ?)",
        )
        .bind(stable_id)
        .bind(OffsetDateTime::now_utc())
        .bind(file_id)
        .bind(stable_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.current_status(file_id).await?;
            return Err(DbError::Internal(format!(
                "stable id already attached to file {file_id}"
            )));
        }
        Ok(())
    }

    async fn register_error(&self, scope: ErrorScope, msg: &str) -> DbResult<()> {
        let (file_id, request_id) = match scope {
            ErrorScope::File(id) => (Some(id), None),
            ErrorScope::Request(id) => (None, Some(id)),
        };
        sqlx::query(
            "INSERT INTO errors (file_id, request_id, hostname, msg, occurred_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(file_id)
        .bind(request_id)
        .bind(hostname())
        .bind(msg)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn make_request(&self, request: &NewRequest) -> DbResult<RequestContext> {
        let row = sqlx::query_as::<_, (i64, Option<String>, Option<String>, Option<String>)>(
            "SELECT id, reenc_header, vault_path, vault_kind FROM files \
             WHERE stable_id = ? AND status = 'Archived'",
        )
        .bind(&request.stable_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((_, header, vault_path, vault_kind)) = row else {
            return Err(DbError::NotFound(format!(
                "no archived file for stable id {}",
                request.stable_id
            )));
        };
        let (Some(header), Some(vault_path), Some(vault_kind)) = (header, vault_path, vault_kind)
        else {
            return Err(DbError::Internal(format!(
                "archived file for stable id {} has no artifacts",
                request.stable_id
            )));
        };

        let request_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO requests (stable_id, user_info, client_ip, start_coordinate, \
             end_coordinate, created_at) VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&request.stable_id)
        .bind(&request.user_info)
        .bind(&request.client_ip)
        .bind(request.start_coordinate)
        .bind(request.end_coordinate)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await?;

        Ok(RequestContext {
            request_id,
            stable_id: request.stable_id.clone(),
            header,
            vault_path,
            vault_kind,
            start_coordinate: request.start_coordinate,
            end_coordinate: request.end_coordinate,
        })
    }

    async fn download_complete(&self, request_id: i64, dl_size: i64, speed: f64) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE requests SET status = 'ok', dl_size = ?, speed = ?, completed_at = ? \
             WHERE id = ? AND status IS NULL",
        )
        .bind(dl_size)
        .bind(speed)
        .bind(OffsetDateTime::now_utc())
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::Internal(format!(
                "request {request_id} already has a terminal status"
            )));
        }
        Ok(())
    }

    async fn download_error(&self, request_id: i64, msg: &str) -> DbResult<()> {
        self.register_error(ErrorScope::Request(request_id), msg).await?;
        // A request already terminal keeps its first outcome; the error
        // record above is still appended.
        sqlx::query(
            "UPDATE requests SET status = 'not_ok', completed_at = ? \
             WHERE id = ? AND status IS NULL",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("state.db")).await.unwrap();
        (dir, store)
    }

    fn new_file<'a>(submission_id: &'a str, filename: &'a str) -> NewFile<'a> {
        NewFile {
            submission_id,
            filename,
            enc_checksum: "aa",
            enc_checksum_algo: "md5",
            org_checksum: "bb",
            org_checksum_algo: "sha256",
        }
    }

    fn artifacts() -> ReencryptionArtifacts {
        ReencryptionArtifacts {
            header_hex: "deadbeef".to_string(),
            key_hex: "cafe".to_string(),
            vault_path: "staging/x".to_string(),
            vault_kind: "POSIX".to_string(),
        }
    }

    #[tokio::test]
    async fn test_file_lifecycle() {
        let (_dir, store) = store().await;
        store.register_submission("sub-1", "jane").await.unwrap();
        let id = store.register_file(&new_file("sub-1", "a.c4gh")).await.unwrap();

        assert_eq!(store.get_file(id).await.unwrap().status().unwrap(), Status::Received);

        store.update_status(id, Status::InProgress).await.unwrap();
        store.set_reencryption(id, &artifacts()).await.unwrap();
        store.set_stable_id(id, "SV000000000000000001").await.unwrap();
        store.update_status(id, Status::Archived).await.unwrap();

        let row = store.get_file(id).await.unwrap();
        assert_eq!(row.status().unwrap(), Status::Archived);
        assert_eq!(row.stable_id.as_deref(), Some("SV000000000000000001"));
        assert_eq!(row.vault_kind.as_deref(), Some("POSIX"));
    }

    #[tokio::test]
    async fn test_status_is_monotonic() {
        let (_dir, store) = store().await;
        store.register_submission("sub-1", "jane").await.unwrap();
        let id = store.register_file(&new_file("sub-1", "a.c4gh")).await.unwrap();

        store.update_status(id, Status::InProgress).await.unwrap();
        store.set_reencryption(id, &artifacts()).await.unwrap();
        store.update_status(id, Status::Archived).await.unwrap();

        // Claiming again is a no-op, not a regression.
        store.update_status(id, Status::InProgress).await.unwrap();
        assert_eq!(store.get_file(id).await.unwrap().status().unwrap(), Status::Archived);

        // Archived cannot be re-entered without an In-progress claim.
        assert!(matches!(
            store.update_status(id, Status::Archived).await,
            Err(DbError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_resubmission_resets_via_upsert() {
        let (_dir, store) = store().await;
        store.register_submission("sub-1", "jane").await.unwrap();
        let id = store.register_file(&new_file("sub-1", "a.c4gh")).await.unwrap();

        store.update_status(id, Status::InProgress).await.unwrap();
        store.set_reencryption(id, &artifacts()).await.unwrap();
        store.update_status(id, Status::Archived).await.unwrap();

        // Explicit re-insert resets status and clears artifacts.
        let id_again = store.register_file(&new_file("sub-1", "a.c4gh")).await.unwrap();
        assert_eq!(id_again, id);
        let row = store.get_file(id).await.unwrap();
        assert_eq!(row.status().unwrap(), Status::Received);
        assert!(row.reenc_header.is_none());

        // The pipeline can then archive it again.
        store.update_status(id, Status::InProgress).await.unwrap();
        store.set_reencryption(id, &artifacts()).await.unwrap();
        store.update_status(id, Status::Archived).await.unwrap();
    }

    #[tokio::test]
    async fn test_artifacts_attach_only_once() {
        let (_dir, store) = store().await;
        store.register_submission("sub-1", "jane").await.unwrap();
        let id = store.register_file(&new_file("sub-1", "a.c4gh")).await.unwrap();

        store.set_reencryption(id, &artifacts()).await.unwrap();
        assert!(matches!(
            store.set_reencryption(id, &artifacts()).await,
            Err(DbError::Internal(_))
        ));

        store.set_stable_id(id, "SV1").await.unwrap();
        // Same value is idempotent, a different one is rejected.
        store.set_stable_id(id, "SV1").await.unwrap();
        assert!(matches!(
            store.set_stable_id(id, "SV2").await,
            Err(DbError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_error_records_accumulate() {
        let (_dir, store) = store().await;
        store.register_submission("sub-1", "jane").await.unwrap();
        let id = store.register_file(&new_file("sub-1", "a.c4gh")).await.unwrap();

        store.register_error(ErrorScope::File(id), "first attempt").await.unwrap();
        store.register_error(ErrorScope::File(id), "second attempt").await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM errors WHERE file_id = ?")
            .bind(id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);

        // Recording an error never changes the status by itself.
        assert_eq!(store.get_file(id).await.unwrap().status().unwrap(), Status::Received);
    }

    async fn archived_file(store: &SqliteStore, stable_id: &str) -> i64 {
        store.register_submission("sub-1", "jane").await.unwrap();
        let id = store.register_file(&new_file("sub-1", "a.c4gh")).await.unwrap();
        store.update_status(id, Status::InProgress).await.unwrap();
        store.set_reencryption(id, &artifacts()).await.unwrap();
        store.set_stable_id(id, stable_id).await.unwrap();
        store.update_status(id, Status::Archived).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_make_request_resolves_context() {
        let (_dir, store) = store().await;
        archived_file(&store, "SV42").await;

        let ctx = store
            .make_request(&NewRequest {
                stable_id: "SV42".to_string(),
                user_info: String::new(),
                client_ip: "10.0.0.1".to_string(),
                start_coordinate: 100,
                end_coordinate: Some(200),
            })
            .await
            .unwrap();

        assert_eq!(ctx.header, "deadbeef");
        assert_eq!(ctx.vault_path, "staging/x");
        assert_eq!(ctx.vault_kind, "POSIX");
        assert_eq!(ctx.end_coordinate, Some(200));
    }

    #[tokio::test]
    async fn test_make_request_unknown_stable_id() {
        let (_dir, store) = store().await;
        let result = store
            .make_request(&NewRequest {
                stable_id: "SV-missing".to_string(),
                user_info: String::new(),
                client_ip: String::new(),
                start_coordinate: 0,
                end_coordinate: None,
            })
            .await;
        assert!(matches!(result, Err(DbError::NotFound(_))));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_request_terminal_write_is_single() {
        let (_dir, store) = store().await;
        archived_file(&store, "SV42").await;

        let ctx = store
            .make_request(&NewRequest {
                stable_id: "SV42".to_string(),
                user_info: String::new(),
                client_ip: String::new(),
                start_coordinate: 0,
                end_coordinate: None,
            })
            .await
            .unwrap();

        store.download_complete(ctx.request_id, 1000, 512.5).await.unwrap();
        assert!(store.download_complete(ctx.request_id, 1000, 512.5).await.is_err());

        // A late error keeps the first outcome but still appends a record.
        store.download_error(ctx.request_id, "late failure").await.unwrap();
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM requests WHERE id = ?")
                .bind(ctx.request_id)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(status.as_deref(), Some("ok"));
    }
}
