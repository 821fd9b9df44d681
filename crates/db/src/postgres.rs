//! PostgreSQL-based state store implementation.

use crate::error::{DbError, DbResult};
use crate::models::{
    ErrorScope, FileRow, NewFile, NewRequest, ReencryptionArtifacts, RequestContext, Status,
};
use crate::retry::{RetryPolicy, classify_connect_error, connect_with_retry};
use crate::store::{StateStore, hostname};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// PostgreSQL-based state store.
///
/// Construction retries within the supplied attempt budget; every operation
/// probes liveness before use and retries the probe once on a fresh
/// connection, so a restarted database does not fail the first query after
/// it comes back.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect with bounded retries, applying the schema on success.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: Option<&str>,
        database: &str,
        max_connections: u32,
        policy: RetryPolicy,
        on_failure: impl FnOnce() + Send,
    ) -> DbResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(user)
            .database(database);
        if let Some(password) = password {
            opts = opts.password(password);
        }

        // Log connection info without the password.
        tracing::info!(host, port, database, user, "connecting to PostgreSQL");

        let pool = connect_with_retry(policy, on_failure, |_| {
            let opts = opts.clone();
            async move {
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect_with(opts)
                    .await
                    .map_err(classify_connect_error)
            }
        })
        .await?;

        sqlx::raw_sql(POSTGRES_SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Probe liveness, retrying once on a fresh connection.
    async fn ensure_live(&self) -> DbResult<()> {
        if sqlx::query("SELECT 1").execute(&self.pool).await.is_ok() {
            return Ok(());
        }
        tracing::warn!("liveness probe failed, retrying on a fresh connection");
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn current_status(&self, file_id: i64) -> DbResult<String> {
        sqlx::query_scalar::<_, String>("SELECT status FROM files WHERE id = $1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("file id {file_id}")))
    }
}

#[async_trait]
impl StateStore for PostgresStore {
    async fn ping(&self) -> DbResult<()> {
        self.ensure_live().await
    }

    async fn register_submission(&self, submission_id: &str, user_id: &str) -> DbResult<()> {
        self.ensure_live().await?;
        sqlx::query(
            "INSERT INTO submissions (id, user_id, created_at) VALUES ($1, $2, $3)
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
        self.ensure_live().await?;
        let now = OffsetDateTime::now_utc();
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO files (
                submission_id, filename, enc_checksum, enc_checksum_algo,
                org_checksum, org_checksum_algo, status, created_at, last_modified
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
        self.ensure_live().await?;
        sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = $1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("file id {file_id}")))
    }

    async fn update_status(&self, file_id: i64, status: Status) -> DbResult<()> {
        self.ensure_live().await?;
        let query = match status {
            Status::InProgress => {
                "UPDATE files SET status = $1, last_modified = $2 \
                 WHERE id = $3 AND status IN ('Received', 'In progress')"
            }
            Status::Archived => {
                "UPDATE files SET status = $1, last_modified = $2 \
                 WHERE id = $3 AND status = 'In progress'"
            }
            Status::Received | Status::Error => {
                "UPDATE files SET status = $1, last_modified = $2 WHERE id = $3"
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
        self.ensure_live().await?;
        let result = sqlx::query(
            "UPDATE files SET reenc_header = $1, reenc_key = $2, vault_path = $3, \
             vault_kind = $4, last_modified = $5 WHERE id = $6 AND reenc_header IS NULL",
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
        self.ensure_live().await?;
        let result = sqlx::query(
            "UPDATE files SET stable_id = $1, last_modified = $2 \
             WHERE id = $3 AND (stable_id IS NULL OR stable_id = $1)",
        )
        .bind(stable_id)
        .bind(OffsetDateTime::now_utc())
        .bind(file_id)
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
        self.ensure_live().await?;
        let (file_id, request_id) = match scope {
            ErrorScope::File(id) => (Some(id), None),
            ErrorScope::Request(id) => (None, Some(id)),
        };
        sqlx::query(
            "INSERT INTO errors (file_id, request_id, hostname, msg, occurred_at) \
             VALUES ($1, $2, $3, $4, $5)",
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
        self.ensure_live().await?;
        let row = sqlx::query_as::<_, (i64, Option<String>, Option<String>, Option<String>)>(
            "SELECT id, reenc_header, vault_path, vault_kind FROM files \
             WHERE stable_id = $1 AND status = 'Archived'",
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
             end_coordinate, created_at) VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
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
        self.ensure_live().await?;
        let result = sqlx::query(
            "UPDATE requests SET status = 'ok', dl_size = $1, speed = $2, completed_at = $3 \
             WHERE id = $4 AND status IS NULL",
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
        sqlx::query(
            "UPDATE requests SET status = 'not_ok', completed_at = $1 \
             WHERE id = $2 AND status IS NULL",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
