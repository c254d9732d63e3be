use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── Admission ───────────────────────────────────────────────────

/// Counter: reservations admitted.
pub const RESERVATIONS_CREATED_TOTAL: &str = "tablewise_reservations_created_total";

/// Counter: reservations cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "tablewise_reservations_cancelled_total";

/// Counter: reservations amended.
pub const RESERVATIONS_AMENDED_TOTAL: &str = "tablewise_reservations_amended_total";

/// Counter: rejected admissions. Labels: reason.
pub const ADMISSION_REJECTIONS_TOTAL: &str = "tablewise_admission_rejections_total";

// ── Store ───────────────────────────────────────────────────────

/// Counter: transactions dropped without commit while holding locks.
pub const TRANSACTIONS_ROLLED_BACK_TOTAL: &str = "tablewise_transactions_rolled_back_total";

/// Histogram: time spent waiting for a user or resource lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "tablewise_lock_wait_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tablewise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commits per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tablewise_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> anyhow::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
