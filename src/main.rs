use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use chairbook::config::DaemonConfig;
use chairbook::engine::Engine;
use chairbook::notify::NotifyHub;
use chairbook::seed::SeedFile;
use chairbook::sweeper;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = DaemonConfig::from_env();
    chairbook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(NotifyHub::new()))?);

    if let Some(path) = &config.seed_path {
        match SeedFile::load(path)?.apply_if_empty(&engine).await? {
            Some(_) => info!("seed loaded from {}", path.display()),
            None => info!("store not empty, seed {} skipped", path.display()),
        }
    }

    info!("chairbook running");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  slot step: {} min", config.schedule.slot_step_minutes);
    info!("  cancellation cutoff: {} min", config.schedule.cancellation_cutoff_minutes);
    info!("  reminder sweep: every {}s", config.reminder_interval.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let reminders = tokio::spawn(sweeper::run_reminders(engine.clone(), config.reminder_interval));
    let compactor = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        COMPACT_CHECK_INTERVAL,
    ));

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received, stopping background tasks");
    reminders.abort();
    compactor.abort();

    // Every committed event is already fsynced; compacting here only makes
    // the next startup replay shorter.
    if engine.wal_appends_since_compact().await > 0
        && let Err(e) = engine.compact_wal().await
    {
        tracing::warn!("final compaction failed: {e}");
    }

    info!("chairbook stopped");
    Ok(())
}
