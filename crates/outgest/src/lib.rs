//! The outgest service: header re-encryption for a requesting party plus
//! streaming of the unmodified, optionally range-limited encrypted body.

pub mod error;
pub mod handlers;

pub use error::{OutgestError, OutgestResult};

use axum::Router;
use axum::routing::post;
use seqvault_crypt::{HeaderSigningKey, SecretKey};
use seqvault_db::StateStore;
use seqvault_storage::VaultRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub vaults: Arc<VaultRegistry>,
    pub secret_key: Arc<SecretKey>,
    pub signing_key: Option<Arc<HeaderSigningKey>>,
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handlers::outgest))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
