use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use odds_ingest::config::{Config, EnvConfig};
use odds_ingest::persistence::sqlite::SqliteMarketStore;
use odds_ingest::OddsPipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is read before the subscriber so RUST_LOG set there applies
    let env_config = EnvConfig::load();
    let config_found = Path::new(&env_config.config_path).exists();
    let mut config = Config::load_or_default(&env_config.config_path)?;
    config.apply_env(&env_config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.system.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Odds ingest starting...");
    if !config_found {
        tracing::warn!("Config file {} not found, using defaults", env_config.config_path);
    }

    tracing::info!("Initializing database: {}", config.system.database_path);
    let store = Arc::new(
        SqliteMarketStore::open(&config.system.database_path)
            .with_context(|| format!("Failed to open database: {}", config.system.database_path))?,
    );
    tracing::info!("Markets on disk: {}", store.count_markets().await?);

    let pipeline = OddsPipeline::start(&config, store.clone(), store)?;
    tracing::info!("Pipeline running, waiting for quotes...");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    pipeline.shutdown().await;

    Ok(())
}
