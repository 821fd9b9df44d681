//! Vault trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// The persisted tag selecting a vault backend for a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaultKind {
    Posix,
    S3,
}

impl VaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posix => "POSIX",
            Self::S3 => "S3",
        }
    }
}

impl FromStr for VaultKind {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "POSIX" => Ok(Self::Posix),
            "S3" => Ok(Self::S3),
            other => Err(StorageError::Config(format!(
                "unknown vault kind: {other}"
            ))),
        }
    }
}

impl fmt::Display for VaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A byte range over an object body. `end` is exclusive; `None` means
/// end-of-stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> StorageResult<Self> {
        if let Some(end) = end
            && end < start
        {
            return Err(StorageError::InvalidRange(format!(
                "end ({end}) < start ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of bytes selected, when bounded.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end - self.start)
    }

    pub fn is_full(&self) -> bool {
        self.start == 0 && self.end.is_none()
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Uniform open-for-read / open-for-write capability over archive storage.
#[async_trait]
pub trait Vault: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Open an object for reading, positioned at `range.start` and capped
    /// at exactly `range.end - range.start` bytes when an end is given.
    async fn open_for_read(&self, key: &str, range: ByteRange) -> StorageResult<ByteStream>;

    /// Open an object for writing. The object becomes visible only after
    /// `finish()`.
    async fn open_for_write(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Static identifier for the backend type, used for logging.
    fn backend_name(&self) -> &'static str;

    /// The persisted tag for this backend.
    fn kind(&self) -> VaultKind;
}

/// Trait for streaming writes into a vault.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_validation() {
        assert!(ByteRange::new(100, Some(200)).is_ok());
        assert!(ByteRange::new(100, Some(100)).is_ok());
        assert!(matches!(
            ByteRange::new(200, Some(100)),
            Err(StorageError::InvalidRange(_))
        ));
        assert_eq!(ByteRange::new(100, Some(200)).unwrap().len(), Some(100));
        assert_eq!(ByteRange::new(5, None).unwrap().len(), None);
        assert!(ByteRange::default().is_full());
    }

    #[test]
    fn test_vault_kind_roundtrip() {
        assert_eq!("POSIX".parse::<VaultKind>().unwrap(), VaultKind::Posix);
        assert_eq!("S3".parse::<VaultKind>().unwrap(), VaultKind::S3);
        assert!("GCS".parse::<VaultKind>().is_err());
        assert_eq!(VaultKind::S3.as_str(), "S3");
    }
}
