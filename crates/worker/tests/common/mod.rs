//! Worker test harness.

use md5::Md5;
use rand_core::{OsRng, RngCore};
use seqvault_core::messages::{IngestionTask, IntegrityClaim};
use seqvault_crypt::{Header, SecretKey, header::HeaderContent, segment};
use seqvault_db::{NewFile, SqliteStore, StateStore};
use seqvault_storage::PosixVault;
use seqvault_worker::TaskContext;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// One worker wired against a SQLite store and a POSIX vault in a temp dir.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestWorker {
    pub ctx: TaskContext,
    pub store: Arc<SqliteStore>,
    pub vault: Arc<PosixVault>,
    pub archive_key_public: seqvault_crypt::PublicKey,
    pub inbox_root: PathBuf,
    _temp: TempDir,
}

#[allow(dead_code)]
impl TestWorker {
    pub async fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let inbox_root = temp.path().join("inbox");
        std::fs::create_dir_all(&inbox_root).expect("inbox dir");

        let store = Arc::new(
            SqliteStore::new(temp.path().join("state.db"))
                .await
                .expect("sqlite store"),
        );
        let vault = Arc::new(
            PosixVault::new(temp.path().join("vault"))
                .await
                .expect("posix vault"),
        );

        let archive_key = SecretKey::generate();
        let archive_key_public = archive_key.public_key();

        let ctx = TaskContext {
            store: store.clone(),
            vault: vault.clone(),
            inbox_pattern: inbox_root.join("{user_id}").to_string_lossy().to_string(),
            staging_prefix: "staging".to_string(),
            chunk_size: 16 * 1024,
            archive_key,
        };

        Self {
            ctx,
            store,
            vault,
            archive_key_public,
            inbox_root,
            _temp: temp,
        }
    }

    /// Drop a container into a user's inbox and return the task describing it.
    pub async fn submit(&self, user_id: &str, filename: &str, plaintext: &[u8]) -> IngestionTask {
        let container = Container::build(&self.archive_key_public, plaintext);

        let user_inbox = self.inbox_root.join(user_id);
        std::fs::create_dir_all(&user_inbox).expect("user inbox");
        std::fs::write(user_inbox.join(filename), &container.bytes).expect("inbox file");

        self.store
            .register_submission("sub-1", user_id)
            .await
            .expect("submission");
        let file_id = self
            .store
            .register_file(&NewFile {
                submission_id: "sub-1",
                filename,
                enc_checksum: &container.encrypted_md5,
                enc_checksum_algo: "md5",
                org_checksum: &container.plaintext_sha256,
                org_checksum_algo: "sha256",
            })
            .await
            .expect("file row");

        IngestionTask {
            file_id,
            user_id: user_id.to_string(),
            elixir_id: None,
            filename: filename.to_string(),
            encrypted_integrity: IntegrityClaim {
                hash: container.encrypted_md5.clone(),
                algorithm: "md5".to_string(),
            },
            unencrypted_integrity: IntegrityClaim {
                hash: container.plaintext_sha256.clone(),
                algorithm: "sha256".to_string(),
            },
        }
    }
}

/// An encrypted container built the way a depositor would.
#[allow(dead_code)]
pub struct Container {
    pub bytes: Vec<u8>,
    pub session_key: [u8; 32],
    pub header_len: usize,
    pub encrypted_md5: String,
    pub plaintext_sha256: String,
}

#[allow(dead_code)]
impl Container {
    pub fn build(recipient: &seqvault_crypt::PublicKey, plaintext: &[u8]) -> Self {
        let mut session_key = [0u8; 32];
        OsRng.fill_bytes(&mut session_key);

        let header = Header::encrypt(&HeaderContent::new(session_key), recipient)
            .expect("header encrypt");
        let header_bytes = header.serialize();

        let mut bytes = header_bytes.clone();
        for chunk in plaintext.chunks(segment::SEGMENT_SIZE) {
            bytes.extend_from_slice(
                &segment::encrypt_segment(&session_key, chunk).expect("segment"),
            );
        }

        Self {
            header_len: header_bytes.len(),
            encrypted_md5: hex::encode(Md5::digest(&bytes)),
            plaintext_sha256: hex::encode(Sha256::digest(plaintext)),
            bytes,
            session_key,
        }
    }
}
