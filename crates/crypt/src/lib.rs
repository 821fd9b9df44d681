//! Container header codec for the seqvault archive format.
//!
//! The archive container is a binary preamble (one or more recipient-keyed
//! session-key packets, plus optional edit-list and signature metadata)
//! followed by a body of independently sealed 64 KiB segments. This crate
//! parses, serializes and re-encrypts headers, and seals/opens body segments
//! for post-copy verification.

pub mod error;
pub mod header;
pub mod keys;
pub mod segment;

pub use error::{CryptError, CryptResult};
pub use header::{Header, HeaderContent, read_header};
pub use keys::{HeaderSigningKey, PublicKey, SecretKey};
pub use segment::{BodyDecryptor, decrypt_segment, encrypt_segment};
