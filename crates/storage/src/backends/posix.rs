//! Local POSIX filesystem vault backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteRange, ByteStream, ObjectMeta, StreamingUpload, Vault, VaultKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem vault.
pub struct PosixVault {
    root: PathBuf,
}

impl PosixVault {
    /// Create a new POSIX vault rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to a path under the vault root.
    ///
    /// Keys never escape the root: traversal components and absolute paths
    /// are rejected outright.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }
        Ok(self.root.join(key))
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn open_file(&self, key: &str) -> StorageResult<fs::File> {
        let path = self.key_path(key)?;
        fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }
}

#[async_trait]
impl Vault for PosixVault {
    #[instrument(skip(self), fields(backend = "posix"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key)?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "posix"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key)?;
        let metadata = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
        })
    }

    #[instrument(skip(self), fields(backend = "posix"))]
    async fn open_for_read(&self, key: &str, range: ByteRange) -> StorageResult<ByteStream> {
        let mut file = self.open_file(key).await?;

        if range.start > 0 {
            file.seek(std::io::SeekFrom::Start(range.start)).await?;
        }
        let mut remaining = range.len();

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let want = match remaining {
                    Some(0) => break,
                    Some(n) => buf.len().min(n as usize),
                    None => buf.len(),
                };
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    break;
                }
                if let Some(ref mut left) = remaining {
                    *left -= n as u64;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "posix"))]
    async fn open_for_write(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key)?;
        self.ensure_parent(&path).await?;

        // Unique temp name so concurrent writers to the same key never clash.
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(PosixUpload {
            file,
            temp_path,
            final_path: path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "posix"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "posix"
    }

    fn kind(&self) -> VaultKind {
        VaultKind::Posix
    }
}

/// Streaming upload writing through a temp file, renamed on finish.
struct PosixUpload {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for PosixUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        // Flush to disk before the rename makes the object visible.
        self.file.sync_all().await?;
        drop(self.file);
        fs::rename(&self.temp_path, &self.final_path).await?;
        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn put(vault: &PosixVault, key: &str, data: &[u8]) {
        let mut upload = vault.open_for_write(key).await.unwrap();
        upload.write(Bytes::copy_from_slice(data)).await.unwrap();
        upload.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = PosixVault::new(dir.path()).await.unwrap();

        put(&vault, "vault/object", b"hello world").await;
        assert!(vault.exists("vault/object").await.unwrap());
        assert_eq!(vault.head("vault/object").await.unwrap().size, 11);

        let data = collect(
            vault
                .open_for_read("vault/object", ByteRange::default())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_ranged_read_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let vault = PosixVault::new(dir.path()).await.unwrap();

        let body: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        put(&vault, "body", &body).await;

        // Bounded range: exactly end - start bytes.
        let range = ByteRange::new(100, Some(200)).unwrap();
        let data = collect(vault.open_for_read("body", range).await.unwrap()).await;
        assert_eq!(data.len(), 100);
        assert_eq!(data, &body[100..200]);

        // Open-ended range: start to EOF.
        let range = ByteRange::new(900, None).unwrap();
        let data = collect(vault.open_for_read("body", range).await.unwrap()).await;
        assert_eq!(data, &body[900..]);

        // End past EOF stops at EOF rather than erroring.
        let range = ByteRange::new(900, Some(5000)).unwrap();
        let data = collect(vault.open_for_read("body", range).await.unwrap()).await;
        assert_eq!(data, &body[900..]);
    }

    #[tokio::test]
    async fn test_abort_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let vault = PosixVault::new(dir.path()).await.unwrap();

        let mut upload = vault.open_for_write("staged").await.unwrap();
        upload.write(Bytes::from_static(b"partial")).await.unwrap();
        upload.abort().await.unwrap();

        assert!(!vault.exists("staged").await.unwrap());
        // No temp droppings either.
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = PosixVault::new(dir.path()).await.unwrap();

        assert!(vault.exists("../escape").await.is_err());
        assert!(vault.exists("/absolute/path").await.is_err());
        assert!(vault.exists("foo/../bar").await.is_err());
        assert!(vault.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vault = PosixVault::new(dir.path()).await.unwrap();

        assert!(matches!(
            vault.open_for_read("absent", ByteRange::default()).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            vault.head("absent").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
