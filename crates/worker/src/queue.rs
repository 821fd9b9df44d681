//! Inbound task and outbound completion queues.
//!
//! The broker transport is an external collaborator; these traits are the
//! consume/publish surface the worker relies on. An in-memory channel pair
//! serves tests and embedded use, and a spool-directory queue stands in
//! where no broker adapter is wired up.

use async_trait::async_trait;
use seqvault_core::messages::{Completion, IngestionTask};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::mpsc;

/// Queue transport errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Where tasks come from. `next_task` returning `None` ends the worker.
#[async_trait]
pub trait TaskSource: Send {
    async fn next_task(&mut self) -> Result<Option<IngestionTask>, QueueError>;
}

/// Where completion messages go.
#[async_trait]
pub trait CompletionSink: Send {
    async fn publish(&mut self, completion: &Completion) -> Result<(), QueueError>;
}

/// In-memory queue pair over bounded channels.
pub struct MemoryQueue;

impl MemoryQueue {
    /// Create a task channel: a sender for the producer side and a source
    /// for the worker.
    pub fn tasks(capacity: usize) -> (mpsc::Sender<IngestionTask>, MemoryTaskSource) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, MemoryTaskSource { rx })
    }

    /// Create a completion channel: a sink for the worker and a receiver
    /// for the consumer side.
    pub fn completions(capacity: usize) -> (MemoryCompletionSink, mpsc::Receiver<Completion>) {
        let (tx, rx) = mpsc::channel(capacity);
        (MemoryCompletionSink { tx }, rx)
    }
}

pub struct MemoryTaskSource {
    rx: mpsc::Receiver<IngestionTask>,
}

#[async_trait]
impl TaskSource for MemoryTaskSource {
    async fn next_task(&mut self) -> Result<Option<IngestionTask>, QueueError> {
        Ok(self.rx.recv().await)
    }
}

pub struct MemoryCompletionSink {
    tx: mpsc::Sender<Completion>,
}

#[async_trait]
impl CompletionSink for MemoryCompletionSink {
    async fn publish(&mut self, completion: &Completion) -> Result<(), QueueError> {
        self.tx
            .send(completion.clone())
            .await
            .map_err(|_| QueueError::Closed)
    }
}

/// Spool-directory queue: consumes `*.json` task files from a directory
/// and writes completion messages into an outbox directory.
///
/// A task file is removed once read, so each task is delivered to exactly
/// one worker instance per file.
pub struct SpoolQueue {
    spool_dir: PathBuf,
    outbox_dir: PathBuf,
    poll_interval: Duration,
}

impl SpoolQueue {
    pub fn new(spool_dir: PathBuf, outbox_dir: PathBuf, poll_interval: Duration) -> Self {
        Self {
            spool_dir,
            outbox_dir,
            poll_interval,
        }
    }

    async fn take_next_file(&self) -> Result<Option<PathBuf>, QueueError> {
        let mut candidates = Vec::new();
        let mut entries = fs::read_dir(&self.spool_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                candidates.push(path);
            }
        }
        // Oldest name first keeps consumption deterministic.
        candidates.sort();
        Ok(candidates.into_iter().next())
    }
}

#[async_trait]
impl TaskSource for SpoolQueue {
    async fn next_task(&mut self) -> Result<Option<IngestionTask>, QueueError> {
        loop {
            if let Some(path) = self.take_next_file().await? {
                let data = fs::read(&path).await?;
                // Consume the file before processing; failed tasks are an
                // operator concern, not requeued.
                fs::remove_file(&path).await?;
                let task: IngestionTask = serde_json::from_slice(&data)?;
                return Ok(Some(task));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl CompletionSink for SpoolQueue {
    async fn publish(&mut self, completion: &Completion) -> Result<(), QueueError> {
        fs::create_dir_all(&self.outbox_dir).await?;
        let path = self
            .outbox_dir
            .join(format!("{}.json", completion.file_id));
        let body = serde_json::to_vec_pretty(completion)?;
        fs::write(&path, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqvault_core::messages::IntegrityClaim;

    fn task(file_id: i64) -> IngestionTask {
        IngestionTask {
            file_id,
            user_id: "jane".to_string(),
            elixir_id: None,
            filename: "a.c4gh".to_string(),
            encrypted_integrity: IntegrityClaim {
                hash: "aa".to_string(),
                algorithm: "md5".to_string(),
            },
            unencrypted_integrity: IntegrityClaim {
                hash: "bb".to_string(),
                algorithm: "sha256".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_memory_queue_delivers_in_order() {
        let (tx, mut source) = MemoryQueue::tasks(4);
        tx.send(task(1)).await.unwrap();
        tx.send(task(2)).await.unwrap();
        drop(tx);

        assert_eq!(source.next_task().await.unwrap().unwrap().file_id, 1);
        assert_eq!(source.next_task().await.unwrap().unwrap().file_id, 2);
        assert!(source.next_task().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spool_queue_consumes_files() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("spool");
        let outbox = dir.path().join("outbox");
        fs::create_dir_all(&spool).await.unwrap();

        let body = serde_json::to_vec(&task(7)).unwrap();
        fs::write(spool.join("task-7.json"), body).await.unwrap();

        let mut queue = SpoolQueue::new(spool.clone(), outbox.clone(), Duration::from_millis(10));
        let received = queue.next_task().await.unwrap().unwrap();
        assert_eq!(received.file_id, 7);
        // The task file is consumed.
        assert!(!spool.join("task-7.json").exists());

        queue
            .publish(&Completion {
                file_id: 7,
                filepath: "staging/x".to_string(),
                target_name: "7".to_string(),
                user_id: "jane".to_string(),
            })
            .await
            .unwrap();
        assert!(outbox.join("7.json").exists());
    }
}
