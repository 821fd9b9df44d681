//! Body segment sealing and streaming decryption.
//!
//! The container body is a sequence of independently sealed segments of at
//! most 64 KiB plaintext, each stored as `nonce[12] || ciphertext || tag[16]`.

use crate::error::{CryptError, CryptResult};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{OsRng, RngCore};

/// Plaintext bytes per body segment.
pub const SEGMENT_SIZE: usize = 65536;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// On-disk bytes per full body segment.
pub const CIPHER_SEGMENT_SIZE: usize = SEGMENT_SIZE + NONCE_LEN + TAG_LEN;

/// Seal one plaintext segment under a session key.
pub fn encrypt_segment(session_key: &[u8; 32], plaintext: &[u8]) -> CryptResult<Vec<u8>> {
    if plaintext.len() > SEGMENT_SIZE {
        return Err(CryptError::Seal(format!(
            "segment plaintext {} exceeds {SEGMENT_SIZE} bytes",
            plaintext.len()
        )));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(session_key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptError::Seal(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open one stored segment under a session key.
pub fn decrypt_segment(session_key: &[u8; 32], segment: &[u8]) -> CryptResult<Vec<u8>> {
    if segment.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptError::Segment(format!(
            "segment of {} bytes is too short",
            segment.len()
        )));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(session_key));
    cipher
        .decrypt(Nonce::from_slice(&segment[..NONCE_LEN]), &segment[NONCE_LEN..])
        .map_err(|_| CryptError::Segment("authentication failed".to_string()))
}

/// Streaming decryptor over a stored body.
///
/// Chunks of arbitrary size are pushed in; full segments are opened as they
/// complete. Any of the supplied session keys may open a given segment.
pub struct BodyDecryptor {
    session_keys: Vec<[u8; 32]>,
    buffer: Vec<u8>,
}

impl BodyDecryptor {
    pub fn new(session_keys: Vec<[u8; 32]>) -> Self {
        Self {
            session_keys,
            buffer: Vec::with_capacity(CIPHER_SEGMENT_SIZE),
        }
    }

    fn open(&self, segment: &[u8]) -> CryptResult<Vec<u8>> {
        for key in &self.session_keys {
            if let Ok(plaintext) = decrypt_segment(key, segment) {
                return Ok(plaintext);
            }
        }
        Err(CryptError::Segment(
            "no session key opens the segment".to_string(),
        ))
    }

    /// Push stored bytes, returning the plaintext of every segment that
    /// completed.
    pub fn update(&mut self, data: &[u8]) -> CryptResult<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut plaintext = Vec::new();
        while self.buffer.len() >= CIPHER_SEGMENT_SIZE {
            let rest = self.buffer.split_off(CIPHER_SEGMENT_SIZE);
            let segment = std::mem::replace(&mut self.buffer, rest);
            plaintext.extend_from_slice(&self.open(&segment)?);
        }
        Ok(plaintext)
    }

    /// Open the final, possibly partial segment.
    pub fn finish(self) -> CryptResult<Vec<u8>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        self.open(&self.buffer)
    }
}
