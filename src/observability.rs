use std::net::SocketAddr;

// ── RED metrics (operation-driven) ──────────────────────────────

/// Counter: engine operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "poolhall_operations_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "poolhall_operation_duration_seconds";

/// Counter: reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "poolhall_reservations_total";

/// Counter: sessions opened.
pub const SESSIONS_OPENED_TOTAL: &str = "poolhall_sessions_opened_total";

/// Counter: sessions closed.
pub const SESSIONS_CLOSED_TOTAL: &str = "poolhall_sessions_closed_total";

/// Counter: blackout applications started.
pub const BLACKOUTS_APPLIED_TOTAL: &str = "poolhall_blackouts_applied_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: tables currently in use.
pub const TABLES_IN_USE: &str = "poolhall_tables_in_use";

/// Gauge: connected broadcast subscribers.
pub const BROADCAST_SUBSCRIBERS: &str = "poolhall_broadcast_subscribers";

/// Counter: notifications dropped because a subscriber lagged.
pub const BROADCAST_DROPPED_TOTAL: &str = "poolhall_broadcast_dropped_total";

/// Counter: light/ping commands that failed or timed out.
pub const SIGNAL_FAILURES_TOTAL: &str = "poolhall_signal_failures_total";

/// Counter: audit entries that could not be recorded.
pub const AUDIT_FAILURES_TOTAL: &str = "poolhall_audit_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "poolhall_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "poolhall_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Label for the outcome of an engine call.
pub fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}
