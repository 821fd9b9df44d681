//! Seqvault ingestion worker binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use seqvault_core::config::WorkerAppConfig;
use seqvault_crypt::SecretKey;
use seqvault_worker::{SpoolQueue, TaskContext, runner};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Seqvault - re-encryption worker
#[derive(Parser, Debug)]
#[command(name = "seqvault-worker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SEQVAULT_CONFIG",
        default_value = "config/worker.toml"
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
    let config: WorkerAppConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("SEQVAULT_").split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let secret_hex = std::fs::read_to_string(&config.keys.secret_key)
        .with_context(|| format!("reading {}", config.keys.secret_key.display()))?;
    let archive_key = SecretKey::from_hex(&secret_hex).context("parsing archive secret key")?;

    // Exhausting the connection attempt budget is fatal for the process.
    let store = seqvault_db::from_config(&config.db, || {
        tracing::error!("data store unavailable, exiting");
        std::process::exit(1);
    })
    .await
    .context("connecting to the data store")?;

    let vault = seqvault_storage::from_config(&config.vault)
        .await
        .context("opening the vault backend")?;

    let ctx = TaskContext {
        store,
        vault,
        inbox_pattern: config.worker.inbox_pattern.clone(),
        staging_prefix: config.worker.staging_prefix.clone(),
        chunk_size: config.worker.chunk_size,
        archive_key,
    };

    tokio::fs::create_dir_all(&config.worker.spool_dir).await?;
    let mut source = SpoolQueue::new(
        config.worker.spool_dir.clone(),
        config.worker.outbox_dir.clone(),
        Duration::from_secs(config.worker.poll_interval_secs),
    );
    let mut sink = SpoolQueue::new(
        config.worker.spool_dir,
        config.worker.outbox_dir,
        Duration::from_secs(config.worker.poll_interval_secs),
    );

    tracing::info!("worker started");
    runner::run(&ctx, &mut source, &mut sink).await?;
    Ok(())
}
