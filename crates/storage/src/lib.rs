//! Vault storage abstraction and backends.
//!
//! This crate provides:
//! - The `Vault` capability trait: open a named object for read or write
//! - Backends: local POSIX filesystem and S3-compatible object storage
//! - The streaming mover for checksum-verified chunked copies

pub mod backends;
pub mod error;
pub mod mover;
pub mod traits;

pub use backends::{posix::PosixVault, s3::S3Vault};
pub use error::{StorageError, StorageResult};
pub use mover::{MoveReport, copy};
pub use traits::{ByteRange, ByteStream, ObjectMeta, StreamingUpload, Vault, VaultKind};

use seqvault_core::config::{VaultConfig, VaultsConfig};
use std::sync::Arc;

/// Create a vault backend from configuration.
pub async fn from_config(config: &VaultConfig) -> StorageResult<Arc<dyn Vault>> {
    match config {
        VaultConfig::Posix(posix) => {
            let backend = PosixVault::new(&posix.path).await?;
            Ok(Arc::new(backend))
        }
        VaultConfig::S3(s3) => {
            s3.validate().map_err(StorageError::Config)?;
            let backend = S3Vault::new(s3).await?;
            Ok(Arc::new(backend))
        }
    }
}

/// The set of configured backends, selected per file by the persisted
/// vault kind tag.
pub struct VaultRegistry {
    posix: Option<Arc<dyn Vault>>,
    s3: Option<Arc<dyn Vault>>,
}

impl VaultRegistry {
    /// Build every configured backend once.
    pub async fn from_config(config: &VaultsConfig) -> StorageResult<Self> {
        let posix = match &config.posix {
            Some(cfg) => Some(from_config(&VaultConfig::Posix(cfg.clone())).await?),
            None => None,
        };
        let s3 = match &config.s3 {
            Some(cfg) => Some(from_config(&VaultConfig::S3(cfg.clone())).await?),
            None => None,
        };
        Ok(Self { posix, s3 })
    }

    /// A registry holding a single pre-built backend (used by tests).
    pub fn single(kind: VaultKind, vault: Arc<dyn Vault>) -> Self {
        match kind {
            VaultKind::Posix => Self {
                posix: Some(vault),
                s3: None,
            },
            VaultKind::S3 => Self {
                posix: None,
                s3: Some(vault),
            },
        }
    }

    /// Look up the backend for a persisted vault kind.
    pub fn get(&self, kind: VaultKind) -> StorageResult<Arc<dyn Vault>> {
        let backend = match kind {
            VaultKind::Posix => self.posix.as_ref(),
            VaultKind::S3 => self.s3.as_ref(),
        };
        backend.cloned().ok_or_else(|| {
            StorageError::Config(format!("no {} backend configured", kind.as_str()))
        })
    }
}
