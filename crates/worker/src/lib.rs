//! The ingestion task executor.
//!
//! A worker pulls one task at a time from an inbound queue, drives it
//! through checksum verification, header re-encryption, staging and
//! plaintext verification, and emits exactly one completion message per
//! archived file. Failed tasks are consumed after recording an error;
//! retries are an operator concern.

pub mod error;
pub mod queue;
pub mod runner;
pub mod task;

pub use error::{IngestError, TaskFailure};
pub use queue::{CompletionSink, MemoryQueue, SpoolQueue, TaskSource};
pub use runner::run;
pub use task::TaskContext;
