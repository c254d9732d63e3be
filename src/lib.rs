//! Table reservation engine: weekly availability calendars, overlap-free
//! admission under concurrent demand, and the reservation lifecycle, made
//! durable through a group-committed write-ahead log.

pub mod availability;
pub mod calendar;
pub mod capability;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::capability::Capabilities;
use crate::config::Config;
use crate::engine::Engine;

/// Compose a running engine from configuration and injected collaborators:
/// logging and metrics, the data directory, WAL replay, and the background
/// compactor.
pub async fn bootstrap(config: &Config, caps: Capabilities) -> anyhow::Result<Arc<Engine>> {
    observability::init_tracing();
    observability::init(config.metrics_port).context("installing metrics exporter")?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let engine = Arc::new(
        Engine::open(config.engine_settings(), caps)
            .await
            .with_context(|| format!("opening WAL {}", config.wal_path().display()))?,
    );

    tokio::spawn(compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    info!("tablewise engine ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  utc_offset: {}", config.utc_offset());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
    Ok(engine)
}
