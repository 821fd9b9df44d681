//! Outgest test harness.

use seqvault_crypt::{Header, HeaderSigningKey, SecretKey, header::HeaderContent};
use seqvault_db::{NewFile, ReencryptionArtifacts, SqliteStore, StateStore, Status};
use seqvault_outgest::{AppState, create_router};
use rand_core::RngCore;
use seqvault_storage::{PosixVault, StreamingUpload as _, Vault, VaultKind, VaultRegistry};
use std::sync::Arc;
use tempfile::TempDir;

/// One outgest service over a SQLite store and a POSIX vault, plus the keys
/// needed to seed and decode traffic.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub store: Arc<SqliteStore>,
    pub vault: Arc<PosixVault>,
    pub archive_key: SecretKey,
    pub signing_key: Arc<HeaderSigningKey>,
    _temp: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");

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

        // The state needs its own key instance, so both sides parse the
        // same hex seed.
        let mut seed = [0u8; 32];
        rand_core::OsRng.fill_bytes(&mut seed);
        let key_hex = hex::encode(seed);
        let archive_key = SecretKey::from_hex(&key_hex).expect("archive key");
        let archive_for_state = SecretKey::from_hex(&key_hex).expect("archive key");
        let signing_key = Arc::new(HeaderSigningKey::generate());

        let state = AppState {
            store: store.clone(),
            vaults: Arc::new(VaultRegistry::single(VaultKind::Posix, vault.clone())),
            secret_key: Arc::new(archive_for_state),
            signing_key: Some(signing_key.clone()),
        };

        Self {
            router: create_router(state),
            store,
            vault,
            archive_key,
            signing_key,
            _temp: temp,
        }
    }

    /// Seed one archived file: a vault object holding `body` and a row with
    /// an archive-keyed header over `session_key`.
    pub async fn seed_archived(&self, stable_id: &str, session_key: [u8; 32], body: &[u8]) {
        let vault_path = format!("vault/{stable_id}");
        let mut upload = self.vault.open_for_write(&vault_path).await.expect("upload");
        upload
            .write(bytes::Bytes::copy_from_slice(body))
            .await
            .expect("write body");
        upload.finish().await.expect("finish body");

        let header = Header::encrypt(
            &HeaderContent::new(session_key),
            &self.archive_key.public_key(),
        )
        .expect("header");

        self.store.register_submission("sub-1", "jane").await.expect("submission");
        let file_id = self
            .store
            .register_file(&NewFile {
                submission_id: "sub-1",
                filename: stable_id,
                enc_checksum: "aa",
                enc_checksum_algo: "md5",
                org_checksum: "bb",
                org_checksum_algo: "sha256",
            })
            .await
            .expect("file row");
        self.store
            .update_status(file_id, Status::InProgress)
            .await
            .expect("claim");
        self.store
            .set_reencryption(
                file_id,
                &ReencryptionArtifacts {
                    header_hex: hex::encode(header.serialize()),
                    key_hex: hex::encode(session_key),
                    vault_path,
                    vault_kind: VaultKind::Posix.as_str().to_string(),
                },
            )
            .await
            .expect("artifacts");
        self.store
            .set_stable_id(file_id, stable_id)
            .await
            .expect("stable id");
        self.store
            .update_status(file_id, Status::Archived)
            .await
            .expect("archive");
    }
}
