//! Inbound task and outbound completion message types.

use serde::{Deserialize, Serialize};

/// A declared integrity claim carried in a task message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityClaim {
    pub hash: String,
    pub algorithm: String,
}

/// One unit of ingestion work, as delivered by the inbound queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionTask {
    pub file_id: i64,
    pub user_id: String,
    #[serde(default)]
    pub elixir_id: Option<String>,
    pub filename: String,
    pub encrypted_integrity: IntegrityClaim,
    pub unencrypted_integrity: IntegrityClaim,
}

/// The single outbound message emitted when a task archives successfully.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub file_id: i64,
    pub filepath: String,
    pub target_name: String,
    pub user_id: String,
}
