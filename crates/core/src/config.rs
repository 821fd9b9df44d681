//! Configuration types shared across services.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Worker service configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Per-user inbox location; `{user_id}` is substituted.
    pub inbox_pattern: String,
    /// Key prefix for staged objects inside the vault.
    #[serde(default = "default_staging_prefix")]
    pub staging_prefix: String,
    /// Chunk size in bytes for streaming copies.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Directory the worker consumes task files from.
    pub spool_dir: PathBuf,
    /// Directory the worker writes completion messages to.
    pub outbox_dir: PathBuf,
    /// Seconds between spool-directory polls when idle.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

/// Outgest service configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutgestSettings {
    /// Bind address (e.g., "127.0.0.1:8443").
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Key material locations. Keys are hex-encoded text files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeysConfig {
    /// The archive's X25519 secret key.
    pub secret_key: PathBuf,
    /// Optional ed25519 header signing key.
    #[serde(default)]
    pub signing_key: Option<PathBuf>,
}

/// POSIX vault backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PosixVaultConfig {
    pub path: PathBuf,
}

/// S3-compatible vault backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct S3VaultConfig {
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3VaultConfig {
    /// Reject partial static credentials.
    pub fn validate(&self) -> Result<(), String> {
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(
                "access_key_id and secret_access_key must be provided together".to_string(),
            );
        }
        Ok(())
    }
}

/// A single vault backend selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VaultConfig {
    Posix(PosixVaultConfig),
    S3(S3VaultConfig),
}

/// All vault backends the outgest service may need to open, since the
/// backend is chosen per file by the persisted vault kind tag.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VaultsConfig {
    #[serde(default)]
    pub posix: Option<PosixVaultConfig>,
    #[serde(default)]
    pub s3: Option<S3VaultConfig>,
}

/// Data store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DbConfig {
    Sqlite {
        path: PathBuf,
    },
    Postgres {
        host: String,
        #[serde(default = "default_pg_port")]
        port: u16,
        user: String,
        #[serde(default)]
        password: Option<String>,
        database: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Connection attempts before the failure hook fires.
        #[serde(default = "default_connect_attempts")]
        connect_attempts: u32,
        /// Seconds between connection attempts.
        #[serde(default = "default_connect_interval_secs")]
        connect_interval_secs: u64,
    },
}

/// Full configuration for the worker binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerAppConfig {
    pub worker: WorkerSettings,
    pub vault: VaultConfig,
    pub db: DbConfig,
    pub keys: KeysConfig,
}

/// Full configuration for the outgest binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutgestAppConfig {
    #[serde(default)]
    pub outgest: OutgestSettings,
    pub vaults: VaultsConfig,
    pub db: DbConfig,
    pub keys: KeysConfig,
}

impl Default for OutgestSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8443".to_string()
}

fn default_chunk_size() -> usize {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_staging_prefix() -> String {
    "staging".to_string()
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_pg_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_interval_secs() -> u64 {
    1
}
