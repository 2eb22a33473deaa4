mod collector;
mod config;
mod error;
mod history;
mod monitor;
mod persist;
mod registry;
mod state;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use collector::Collector;
use history::HistoryStore;
use monitor::Monitor;
use registry::StationRegistry;
use state::SystemState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Storage ─────────────────────────────────────────────────────
    tokio::fs::create_dir_all(&cfg.data_dir)
        .await
        .with_context(|| format!("failed to create data dir: {}", cfg.data_dir.display()))?;

    let registry = Arc::new(StationRegistry::new(cfg.registry_path(), cfg.station_names()));
    config::apply(&cfg, &registry).await?;

    let history = Arc::new(HistoryStore::new(cfg.history_path(), cfg.max_records));
    history
        .ensure()
        .await
        .context("failed to initialise history log")?;

    let unconfigured = registry
        .load()
        .await
        .iter()
        .filter(|e| e.address.is_empty())
        .count();
    if unconfigured > 0 {
        tracing::warn!(unconfigured, "some stations have no address yet");
    }

    tracing::info!(
        stations = registry.names().len(),
        registry = %registry.path().display(),
        history = %history.path().display(),
        max_records = history.max_records(),
        "storage ready"
    );

    // ── Shared state (ephemeral, for consumers) ─────────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(cfg.initial_station())));
    {
        let mut st = shared.write().await;
        st.record_system("hub started".to_string());
    }

    let cancel = CancellationToken::new();

    // ── Collector ───────────────────────────────────────────────────
    let collector = Collector::new(
        cfg.poll_settings(),
        Arc::clone(&registry),
        Arc::clone(&history),
        Arc::clone(&shared),
    )
    .context("failed to build http client")?;
    let collector_task = tokio::spawn(collector.run(cancel.clone()));

    // ── Web API ─────────────────────────────────────────────────────
    let monitor = Monitor::new(registry, history, shared);
    let web_cancel = cancel.clone();
    let web_task = tokio::spawn(async move {
        if let Err(e) = web::serve(monitor, async move { web_cancel.cancelled().await }).await {
            tracing::error!("web server error: {e:#}");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    // In-flight history writes finish before the collector task returns.
    if let Err(e) = collector_task.await {
        tracing::error!("collector task failed: {e}");
    }
    if let Err(e) = web_task.await {
        tracing::error!("web task failed: {e}");
    }
    Ok(())
}
