use std::net::SocketAddr;

use crate::engine::EngineError;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (reserved, conflict, outside_hours).
pub const RESERVATIONS_TOTAL: &str = "chairbook_reservations_total";

/// Histogram: time to gather snapshots and resolve availability, in seconds.
pub const AVAILABILITY_QUERY_DURATION_SECONDS: &str =
    "chairbook_availability_query_duration_seconds";

/// Histogram: slots returned per availability query.
pub const SLOTS_RETURNED: &str = "chairbook_slots_returned";

/// Counter: reminders recorded by the sweeper.
pub const REMINDERS_SENT_TOTAL: &str = "chairbook_reminders_sent_total";

/// Counter: sweeper or compactor failures. Labels: task, error.
pub const BACKGROUND_ERRORS_TOTAL: &str = "chairbook_background_errors_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chairbook_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "chairbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for an error, for metric labels.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::InvalidTimeFormat(_) => "invalid_time_format",
        EngineError::InvalidStep(_) => "invalid_step",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::Conflict(_) => "conflict",
        EngineError::NotFound(_) => "not_found",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::InvalidWindow(_) => "invalid_window",
        EngineError::InvalidDuration(_) => "invalid_duration",
        EngineError::OutsideWorkingHours => "outside_working_hours",
        EngineError::CancellationWindowClosed => "cancellation_window_closed",
        EngineError::AppointmentClosed(_) => "appointment_closed",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::WalError(_) => "wal",
    }
}
