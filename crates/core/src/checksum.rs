//! Checksum types and the streaming verifier.

use crate::error::{Error, Result};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A digest algorithm selected by a caller-supplied name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Expected hex digest length for this algorithm.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared checksum: an algorithm name plus a hex digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

impl Checksum {
    /// Build a checksum from a caller-supplied algorithm name and hex digest.
    pub fn new(algorithm: &str, digest: &str) -> Result<Self> {
        let algorithm: ChecksumAlgorithm = algorithm.parse()?;
        if digest.len() != algorithm.digest_len()
            || !digest.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(Error::InvalidDigest(format!(
                "expected {} hex chars for {algorithm}, got {:?}",
                algorithm.digest_len(),
                digest
            )));
        }
        Ok(Self {
            algorithm,
            digest: digest.to_ascii_lowercase(),
        })
    }

    /// Compare against a computed hex digest, case-insensitively.
    pub fn matches(&self, computed: &str) -> bool {
        self.digest.eq_ignore_ascii_case(computed)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

/// Incremental digest over fixed-size reads.
pub enum StreamingDigest {
    Md5(Md5),
    Sha256(Sha256),
}

impl StreamingDigest {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    /// Update the digest with data.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compute the hex digest of a byte source without materializing it.
pub async fn digest_reader<R>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = StreamingDigest::new(algorithm);
    let mut buf = vec![0u8; crate::VERIFY_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// Verify a byte source against a declared checksum.
///
/// A mismatch is a normal negative result, not an error.
pub async fn verify_reader<R>(reader: &mut R, declared: &Checksum) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let computed = digest_reader(reader, declared.algorithm).await?;
    Ok(declared.matches(&computed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(
            "MD5".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Md5
        );
        assert_eq!(
            "sha256".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha256
        );
        assert!(matches!(
            "sha512".parse::<ChecksumAlgorithm>(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_checksum_rejects_bad_digest() {
        assert!(Checksum::new("md5", "abc").is_err());
        assert!(Checksum::new("md5", &"z".repeat(32)).is_err());
        assert!(Checksum::new("md5", &"a".repeat(32)).is_ok());
    }

    #[tokio::test]
    async fn test_verify_reader_match_and_mismatch() {
        let data = b"hello world";
        let digest = hex::encode(Sha256::digest(data));
        let declared = Checksum::new("sha256", &digest).unwrap();

        let mut cursor = &data[..];
        assert!(verify_reader(&mut cursor, &declared).await.unwrap());

        let wrong = Checksum::new("sha256", &"0".repeat(64)).unwrap();
        let mut cursor = &data[..];
        assert!(!verify_reader(&mut cursor, &wrong).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_reader_idempotent() {
        let data = b"some genomic payload";
        let digest = hex::encode(Md5::digest(data));
        let declared = Checksum::new("md5", &digest).unwrap();

        let first = verify_reader(&mut &data[..], &declared).await.unwrap();
        let second = verify_reader(&mut &data[..], &declared).await.unwrap();
        assert_eq!(first, second);
        assert!(first);
    }

    #[test]
    fn test_digest_comparison_is_case_insensitive() {
        let declared = Checksum::new("md5", &"AB".repeat(16)).unwrap();
        assert!(declared.matches(&"ab".repeat(16)));
    }
}
