//! Vault backend implementations.

pub mod posix;
pub mod s3;
