//! Shared domain types for the seqvault archival pipeline.
//!
//! This crate provides:
//! - Checksum types and the streaming verifier
//! - Configuration types shared across services
//! - Inbound task and outbound completion message types

pub mod checksum;
pub mod config;
pub mod error;
pub mod messages;

pub use checksum::{Checksum, ChecksumAlgorithm, StreamingDigest};
pub use error::{Error, Result};
pub use messages::{Completion, IngestionTask, IntegrityClaim};

/// Default chunk size for streaming copies (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Chunk size for streaming checksum verification (64 KiB).
pub const VERIFY_CHUNK_SIZE: usize = 64 * 1024;
