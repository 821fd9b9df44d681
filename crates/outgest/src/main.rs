//! Seqvault outgest service binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use seqvault_core::config::OutgestAppConfig;
use seqvault_crypt::{HeaderSigningKey, SecretKey};
use seqvault_outgest::{AppState, create_router};
use seqvault_storage::VaultRegistry;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Seqvault - outgest (re-encryption streaming) service
#[derive(Parser, Debug)]
#[command(name = "seqvault-outgest")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SEQVAULT_CONFIG",
        default_value = "config/outgest.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config: OutgestAppConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("SEQVAULT_").split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let secret_hex = std::fs::read_to_string(&config.keys.secret_key)
        .with_context(|| format!("reading {}", config.keys.secret_key.display()))?;
    let secret_key =
        Arc::new(SecretKey::from_hex(&secret_hex).context("parsing archive secret key")?);

    let signing_key = match &config.keys.signing_key {
        Some(path) => {
            let hex_body = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Some(Arc::new(
                HeaderSigningKey::from_hex(&hex_body).context("parsing header signing key")?,
            ))
        }
        None => None,
    };

    let store = seqvault_db::from_config(&config.db, || {
        tracing::error!("data store unavailable, exiting");
        std::process::exit(1);
    })
    .await
    .context("connecting to the data store")?;

    let vaults = Arc::new(
        VaultRegistry::from_config(&config.vaults)
            .await
            .context("opening vault backends")?,
    );

    let state = AppState {
        store,
        vaults,
        secret_key,
        signing_key,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.outgest.bind)
        .await
        .with_context(|| format!("binding {}", config.outgest.bind))?;
    tracing::info!(bind = %config.outgest.bind, "outgest service started");
    axum::serve(listener, router).await?;
    Ok(())
}
