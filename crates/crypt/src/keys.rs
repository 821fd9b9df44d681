//! Key types for header envelopes and signatures.

use crate::error::{CryptError, CryptResult};
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use std::fmt;

fn decode_key_hex(s: &str) -> CryptResult<[u8; 32]> {
    let bytes = hex::decode(s.trim()).map_err(|e| CryptError::InvalidKey(format!("invalid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CryptError::InvalidKey("expected 32 bytes".to_string()))
}

/// An X25519 secret key used to open header envelopes.
pub struct SecretKey {
    scalar: Scalar,
}

impl SecretKey {
    /// Generate a new random secret key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self {
            scalar: Scalar::from_bytes_mod_order(bytes),
        }
    }

    /// Parse from a hex-encoded key file body.
    pub fn from_hex(s: &str) -> CryptResult<Self> {
        let bytes = decode_key_hex(s)?;
        Ok(Self {
            scalar: Scalar::from_bytes_mod_order(bytes),
        })
    }

    /// Get the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            point: MontgomeryPoint::mul_base(&self.scalar),
        }
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.scalar
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// An X25519 public key identifying a header recipient.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    point: MontgomeryPoint,
}

impl PublicKey {
    /// Parse from a hex-encoded key string.
    pub fn from_hex(s: &str) -> CryptResult<Self> {
        Ok(Self {
            point: MontgomeryPoint(decode_key_hex(s)?),
        })
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            point: MontgomeryPoint(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.point.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.point.0)
    }

    pub(crate) fn point(&self) -> &MontgomeryPoint {
        &self.point
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..8])
    }
}

/// An ed25519 key used to sign re-encrypted headers.
pub struct HeaderSigningKey {
    inner: SigningKey,
}

impl HeaderSigningKey {
    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self {
            inner: SigningKey::from_bytes(&bytes),
        }
    }

    /// Parse from a hex-encoded key file body.
    pub fn from_hex(s: &str) -> CryptResult<Self> {
        Ok(Self {
            inner: SigningKey::from_bytes(&decode_key_hex(s)?),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.inner.verifying_key()
    }

    pub(crate) fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.inner.sign(message).to_bytes()
    }
}

impl fmt::Debug for HeaderSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeaderSigningKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_key_hex_roundtrip() {
        let hex_key = "aa".repeat(32);
        let key = SecretKey::from_hex(&hex_key).unwrap();
        let public = key.public_key();
        assert_eq!(PublicKey::from_hex(&public.to_hex()).unwrap(), public);
    }

    #[test]
    fn test_key_hex_rejects_bad_input() {
        assert!(matches!(
            SecretKey::from_hex("not hex"),
            Err(CryptError::InvalidKey(_))
        ));
        assert!(matches!(
            PublicKey::from_hex("abcd"),
            Err(CryptError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_key_file_whitespace_tolerated() {
        let hex_key = format!("{}\n", "ab".repeat(32));
        assert!(SecretKey::from_hex(&hex_key).is_ok());
    }
}
