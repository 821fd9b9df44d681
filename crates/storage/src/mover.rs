//! The streaming mover: chunked copies with byte and elapsed-time accounting.

use crate::error::StorageResult;
use crate::traits::StreamingUpload;
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of a completed move.
#[derive(Clone, Copy, Debug)]
pub struct MoveReport {
    pub bytes_moved: u64,
    pub elapsed: Duration,
}

impl MoveReport {
    /// Bytes per second over the whole move.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_moved as f64 / secs
        } else {
            0.0
        }
    }
}

/// Copy a byte source into a vault upload in fixed-size chunks.
///
/// The upload is finished on success and aborted on every error path, so
/// the sink handle is released no matter how the copy exits.
pub async fn copy<R>(
    reader: &mut R,
    upload: Box<dyn StreamingUpload>,
    chunk_size: usize,
) -> StorageResult<MoveReport>
where
    R: AsyncRead + Unpin,
{
    let started = Instant::now();
    let mut upload = upload;

    match copy_chunks(reader, upload.as_mut(), chunk_size).await {
        Ok(bytes_moved) => {
            upload.finish().await?;
            Ok(MoveReport {
                bytes_moved,
                elapsed: started.elapsed(),
            })
        }
        Err(e) => {
            let _ = upload.abort().await;
            Err(e)
        }
    }
}

async fn copy_chunks<R>(
    reader: &mut R,
    upload: &mut dyn StreamingUpload,
    chunk_size: usize,
) -> StorageResult<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut moved = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(moved);
        }
        upload.write(Bytes::copy_from_slice(&buf[..n])).await?;
        moved += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SinkUpload {
        data: Vec<u8>,
        fail_after: Option<usize>,
        aborted: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamingUpload for SinkUpload {
        async fn write(&mut self, data: Bytes) -> StorageResult<()> {
            if let Some(limit) = self.fail_after
                && self.data.len() + data.len() > limit
            {
                return Err(StorageError::Config("sink full".to_string()));
            }
            self.data.extend_from_slice(&data);
            Ok(())
        }

        async fn finish(self: Box<Self>) -> StorageResult<u64> {
            Ok(self.data.len() as u64)
        }

        async fn abort(self: Box<Self>) -> StorageResult<()> {
            self.aborted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_copy_counts_all_bytes() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
        let aborted = Arc::new(AtomicBool::new(false));
        let upload = Box::new(SinkUpload {
            data: Vec::new(),
            fail_after: None,
            aborted: aborted.clone(),
        });

        let report = copy(&mut &data[..], upload, 4096).await.unwrap();
        assert_eq!(report.bytes_moved, 100_000);
        assert!(!aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_copy_aborts_on_sink_error() {
        let data = vec![0u8; 10_000];
        let aborted = Arc::new(AtomicBool::new(false));
        let upload = Box::new(SinkUpload {
            data: Vec::new(),
            fail_after: Some(5_000),
            aborted: aborted.clone(),
        });

        let result = copy(&mut &data[..], upload, 1024).await;
        assert!(result.is_err());
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_throughput() {
        let report = MoveReport {
            bytes_moved: 1000,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(report.throughput(), 500.0);

        let zero = MoveReport {
            bytes_moved: 1000,
            elapsed: Duration::ZERO,
        };
        assert_eq!(zero.throughput(), 0.0);
    }
}
