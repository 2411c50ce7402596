//! Kentik Image Cache - deduplicating chart cache
//!
//! Serves rendered Kentik charts from a persistent cache, fetching each
//! distinct query from the Kentik API at most once per TTL.

use entry_store::EntryStore;
use image_cache::config::env_flag;
use image_cache::{
    start_server, CacheEngine, Config, Fetcher, Janitor, Result, ServerState, SharedState,
};
use kentik_chart_client::KentikClient;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let level = if std::env::var("DEBUG").map(|v| env_flag(&v)).unwrap_or(false) {
        "image_cache=debug"
    } else {
        "image_cache=info"
    };
    let env_filter = EnvFilter::from_default_env().add_directive(level.parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Kentik Image Cache...");

    // Load configuration from environment
    let config = Config::from_env()?;
    config.log_summary();

    // Open storage
    let store = EntryStore::new(&config.cache_path);
    store.init().await?;

    let client = KentikClient::new(&config.api_url, &config.auth_email, &config.auth_token)?;
    let fetcher = Fetcher::new(Arc::new(client), config.fetch_policy());
    let engine = CacheEngine::new(store, fetcher, config.engine_settings());

    // Drop expired entries and resume interrupted fetches before serving
    engine.recover().await?;
    Janitor::new(engine.clone(), config.maintenance_period).spawn();

    let state: SharedState = Arc::new(ServerState::new(
        engine,
        config.wait_ceiling,
        config.poll_interval,
    ));

    // Start HTTP server (blocking)
    start_server(state, config.port).await?;

    Ok(())
}
