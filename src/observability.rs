use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking commit attempts. Labels: outcome.
pub const COMMITS_TOTAL: &str = "bookings_commits_total";

/// Histogram: commit latency in seconds, validation through mail enqueue.
pub const COMMIT_DURATION_SECONDS: &str = "bookings_commit_duration_seconds";

/// Counter: availability queries. Labels: kind (room, all_rooms, free_spans).
pub const AVAILABILITY_QUERIES_TOTAL: &str = "bookings_availability_queries_total";

/// Histogram: availability query latency in seconds. Labels: kind.
pub const AVAILABILITY_QUERY_DURATION_SECONDS: &str = "bookings_availability_query_duration_seconds";

/// Counter: owner block changes. Labels: action (add, remove).
pub const BLOCK_CHANGES_TOTAL: &str = "bookings_block_changes_total";

/// Counter: store calls abandoned after the store timeout. Labels: op.
pub const STORE_TIMEOUTS_TOTAL: &str = "bookings_store_timeouts_total";

/// Counter: reservations persisted without a restriction that could not be
/// rolled back. Anything above zero needs manual reconciliation.
pub const INCONSISTENCIES_TOTAL: &str = "bookings_inconsistencies_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: mail deliveries. Labels: status (sent, failed).
pub const MAIL_DELIVERIES_TOTAL: &str = "bookings_mail_deliveries_total";

/// Gauge: live sessions.
pub const SESSIONS_ACTIVE: &str = "bookings_sessions_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookings_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookings_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
