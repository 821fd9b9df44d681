//! Database models and the file status enum.

use crate::error::{DbError, DbResult};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// The authoritative status of a submitted file.
///
/// Transitions are one-directional except the externally-triggered upsert
/// reset to `Received`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Received,
    InProgress,
    Archived,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "Received",
            Self::InProgress => "In progress",
            Self::Archived => "Archived",
            Self::Error => "Error",
        }
    }
}

impl FromStr for Status {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        match s {
            "Received" => Ok(Self::Received),
            "In progress" => Ok(Self::InProgress),
            "Archived" => Ok(Self::Archived),
            "Error" => Ok(Self::Error),
            other => Err(DbError::Internal(format!("unknown file status: {other}"))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file row as persisted.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: i64,
    pub submission_id: String,
    pub filename: String,
    pub enc_checksum: String,
    pub enc_checksum_algo: String,
    pub org_checksum: String,
    pub org_checksum_algo: String,
    pub status: String,
    pub reenc_header: Option<String>,
    pub reenc_key: Option<String>,
    pub stable_id: Option<String>,
    pub vault_path: Option<String>,
    pub vault_kind: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_modified: OffsetDateTime,
}

impl FileRow {
    pub fn status(&self) -> DbResult<Status> {
        self.status.parse()
    }
}

/// Fields for registering a file under a submission.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub submission_id: &'a str,
    pub filename: &'a str,
    pub enc_checksum: &'a str,
    pub enc_checksum_algo: &'a str,
    pub org_checksum: &'a str,
    pub org_checksum_algo: &'a str,
}

/// Re-encryption artifacts attached exactly once, at archive time.
///
/// The key material is stored hex-encoded with no at-rest encryption of
/// the column; see DESIGN.md for the recorded exposure.
#[derive(Debug, Clone)]
pub struct ReencryptionArtifacts {
    pub header_hex: String,
    pub key_hex: String,
    pub vault_path: String,
    pub vault_kind: String,
}

/// Which entity an error record points at.
#[derive(Debug, Clone, Copy)]
pub enum ErrorScope {
    File(i64),
    Request(i64),
}

/// Fields for creating a download request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub stable_id: String,
    pub user_info: String,
    pub client_ip: String,
    pub start_coordinate: i64,
    pub end_coordinate: Option<i64>,
}

/// The resolved context returned when a download request is created.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: i64,
    pub stable_id: String,
    /// Hex-encoded archive-keyed header bytes.
    pub header: String,
    pub vault_path: String,
    pub vault_kind: String,
    pub start_coordinate: i64,
    pub end_coordinate: Option<i64>,
}
