//! The per-task ingestion pipeline.

use crate::error::{IngestError, TaskFailure};
use futures::StreamExt;
use seqvault_core::checksum::{self, Checksum, StreamingDigest};
use seqvault_core::messages::{Completion, IngestionTask};
use seqvault_crypt::{BodyDecryptor, SecretKey, read_header};
use seqvault_db::{ReencryptionArtifacts, StateStore, Status};
use seqvault_storage::{ByteRange, Vault, mover};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

/// Everything one worker needs to process tasks: a store handle, a vault
/// backend, the inbox layout and the archive key.
pub struct TaskContext {
    pub store: Arc<dyn StateStore>,
    pub vault: Arc<dyn Vault>,
    /// Per-user inbox location; `{user_id}` is substituted.
    pub inbox_pattern: String,
    /// Key prefix for staged objects.
    pub staging_prefix: String,
    pub chunk_size: usize,
    pub archive_key: SecretKey,
}

impl TaskContext {
    fn inbox_path(&self, user_id: &str, filename: &str) -> PathBuf {
        PathBuf::from(self.inbox_pattern.replace("{user_id}", user_id)).join(filename)
    }

    /// Run one task to completion.
    ///
    /// Success yields the single outbound completion message; failure
    /// yields the cause tied to the file id, for the runner to persist.
    pub async fn process(&self, task: &IngestionTask) -> Result<Completion, TaskFailure> {
        self.run_task(task).await.map_err(|cause| TaskFailure {
            file_id: task.file_id,
            cause,
        })
    }

    async fn run_task(&self, task: &IngestionTask) -> Result<Completion, IngestError> {
        // Claim the file before anything else; the claim is idempotent.
        self.store
            .update_status(task.file_id, Status::InProgress)
            .await?;

        let inbox_filepath = self.inbox_path(&task.user_id, &task.filename);
        tracing::info!(
            file_id = task.file_id,
            path = %inbox_filepath.display(),
            "processing {}",
            task.filename
        );
        if !fs::try_exists(&inbox_filepath).await? {
            return Err(IngestError::NotFoundInInbox(task.filename.clone()));
        }

        // Integrity of the encrypted inbox copy, verified streaming.
        let declared = Checksum::new(
            &task.encrypted_integrity.algorithm,
            &task.encrypted_integrity.hash,
        )?;
        let mut file = fs::File::open(&inbox_filepath).await?;
        if !checksum::verify_reader(&mut file, &declared).await? {
            return Err(IngestError::ChecksumMismatch {
                algorithm: declared.algorithm.to_string(),
                path: inbox_filepath.display().to_string(),
            });
        }
        tracing::debug!(file_id = task.file_id, "valid {} checksum", declared.algorithm);

        // Recover the session keys, then re-encrypt the header for the
        // archive's own key. The body is never re-encrypted.
        let mut file = fs::File::open(&inbox_filepath).await?;
        let header = read_header(&mut file).await?;
        let content = header.decrypt(&self.archive_key)?;
        let archive_header =
            header.reencrypt(&self.archive_key.public_key(), &self.archive_key, None)?;

        // Stage the body under a unique name, header stripped.
        let staging_key = format!("{}/{}", self.staging_prefix, Uuid::new_v4());
        tracing::debug!(file_id = task.file_id, staging_key, "staging body");
        let upload = self.vault.open_for_write(&staging_key).await?;
        let report = mover::copy(&mut file, upload, self.chunk_size).await?;
        tracing::info!(
            file_id = task.file_id,
            backend = self.vault.backend_name(),
            bytes = report.bytes_moved,
            elapsed_ms = report.elapsed.as_millis() as u64,
            throughput = report.throughput(),
            "body staged"
        );

        match self.finalize(task, &content.session_keys, &archive_header, &staging_key).await {
            Ok(completion) => Ok(completion),
            Err(e) => {
                // The staging area is transient; failed artifacts are not
                // left behind.
                let _ = self.vault.delete(&staging_key).await;
                Err(e)
            }
        }
    }

    async fn finalize(
        &self,
        task: &IngestionTask,
        session_keys: &[[u8; 32]],
        archive_header: &seqvault_crypt::Header,
        staging_key: &str,
    ) -> Result<Completion, IngestError> {
        // Ingestion correctness depends on the final artifact: only after
        // the full copy is the staged plaintext rehashed and compared.
        let declared = Checksum::new(
            &task.unencrypted_integrity.algorithm,
            &task.unencrypted_integrity.hash,
        )?;
        self.verify_staged(staging_key, session_keys, &declared).await?;

        let key_bytes: Vec<u8> = session_keys.iter().flatten().copied().collect();
        let artifacts = ReencryptionArtifacts {
            header_hex: hex::encode(archive_header.serialize()),
            key_hex: hex::encode(key_bytes),
            vault_path: staging_key.to_string(),
            vault_kind: self.vault.kind().as_str().to_string(),
        };
        self.store.set_reencryption(task.file_id, &artifacts).await?;

        let stable_id = format!("SV{:018}", task.file_id);
        self.store.set_stable_id(task.file_id, &stable_id).await?;
        self.store
            .update_status(task.file_id, Status::Archived)
            .await?;

        Ok(Completion {
            file_id: task.file_id,
            filepath: staging_key.to_string(),
            target_name: format!("{:0>20}", task.file_id),
            user_id: task.user_id.clone(),
        })
    }

    /// Decrypt the staged body and compare its plaintext digest with the
    /// declared original checksum.
    async fn verify_staged(
        &self,
        staging_key: &str,
        session_keys: &[[u8; 32]],
        declared: &Checksum,
    ) -> Result<(), IngestError> {
        let mut stream = self
            .vault
            .open_for_read(staging_key, ByteRange::default())
            .await?;
        let mut decryptor = BodyDecryptor::new(session_keys.to_vec());
        let mut digest = StreamingDigest::new(declared.algorithm);

        while let Some(chunk) = stream.next().await {
            digest.update(&decryptor.update(&chunk?)?);
        }
        digest.update(&decryptor.finish()?);

        let computed = digest.finalize_hex();
        if !declared.matches(&computed) {
            return Err(IngestError::ChecksumMismatch {
                algorithm: declared.algorithm.to_string(),
                path: staging_key.to_string(),
            });
        }
        Ok(())
    }
}
