use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::observability::{self, BACKGROUND_ERRORS_TOTAL, REMINDERS_SENT_TOTAL};

/// Record reminders for tomorrow's confirmed appointments. Returns how many
/// were newly recorded; running it twice for the same day records nothing
/// the second time.
pub async fn send_due_reminders(engine: &Engine, now: NaiveDateTime) -> Result<usize, EngineError> {
    let Some(tomorrow) = now.date().succ_opt() else {
        return Ok(0);
    };

    let mut sent = 0;
    for appointment in engine.due_reminders(tomorrow).await {
        match engine.mark_reminded(appointment.id(), now).await {
            Ok(true) => {
                info!(
                    "reminder: client {} with {} on {} at {}",
                    appointment.client_id,
                    appointment.resource_id(),
                    appointment.interval.date,
                    appointment.interval.start
                );
                sent += 1;
            }
            // Cancelled or reminded between listing and marking.
            Ok(false) => debug!("reminder skipped for {}", appointment.id()),
            Err(e @ EngineError::WalError(_)) => return Err(e),
            Err(e) => debug!("reminder skipped for {}: {e}", appointment.id()),
        }
    }
    metrics::counter!(REMINDERS_SENT_TOTAL).increment(sent as u64);
    Ok(sent)
}

fn record_background_error(task: &'static str, e: &EngineError) {
    let label = observability::error_label(e);
    metrics::counter!(BACKGROUND_ERRORS_TOTAL, "task" => task, "error" => label).increment(1);
}

/// Periodic reminder sweep, using the local wall clock.
pub async fn run_reminders(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match send_due_reminders(&engine, Local::now().naive_local()).await {
            Ok(0) => {}
            Ok(n) => info!("reminder sweep recorded {n} reminders"),
            Err(e) => {
                warn!("reminder sweep failed: {e}");
                record_background_error("reminders", &e);
            }
        }
    }
}

/// Compact the WAL once it has grown past `threshold` appends.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        debug!("compacting after {appends} appends");
        if let Err(e) = engine.compact_wal().await {
            warn!("WAL compaction failed: {e}");
            record_background_error("compactor", &e);
        }
    }
}
