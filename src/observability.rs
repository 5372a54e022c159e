use std::net::SocketAddr;

// ── Request-driven ─────────────────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "hotel_reservations_created_total";

/// Counter: reservation attempts refused because the days were taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "hotel_reservation_conflicts_total";

/// Counter: availability lookups. Labels: scope (`room`, `all`).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "hotel_availability_checks_total";

/// Counter: calendar writes. Labels: op (`block`, `unblock`), outcome (`ok`, `error`).
pub const CALENDAR_CHANGES_TOTAL: &str = "hotel_calendar_changes_total";

/// Counter: store operations that gave up waiting. Labels: op.
pub const STORE_TIMEOUTS_TOTAL: &str = "hotel_store_timeouts_total";

/// Counter: notification mails handed to the transport. Labels: kind.
pub const MAIL_SENT_TOTAL: &str = "hotel_mail_sent_total";

/// Counter: notification mails the transport rejected. Labels: kind.
pub const MAIL_FAILED_TOTAL: &str = "hotel_mail_failed_total";

// ── Resource utilization ─────────────────────────────────────────

/// Gauge: rooms in the catalog.
pub const ROOMS: &str = "hotel_rooms";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hotel_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hotel_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
