//! Smart Storage - maintenance host
//!
//! Keeps a file-backed store tidy: runs scheduled maintenance passes and
//! reacts to host signals until shut down.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smart_storage::{
    Config, FileBackend, HostSignal, MaintenanceScheduler, MaintenanceSettings, SmartStorage,
    StorageBackend, TokioScheduler,
};

/// Main entry point for the maintenance host.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the file-backed store
/// 4. Register maintenance on a Tokio scheduler
/// 5. Forward SIGUSR1 as a storage-changed signal
/// 6. Tear maintenance down on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smart_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Smart Storage maintenance host");

    let config = Config::from_env();
    info!(
        "Configuration loaded: path={}, max_size={} bytes, namespace={:?}, maintenance_interval={}s",
        config.data_path.display(),
        config.max_size,
        config.namespace,
        config.maintenance_interval
    );

    let backend = FileBackend::open(&config.data_path)
        .with_context(|| format!("Failed to open {}", config.data_path.display()))?;
    info!(
        "Opened {} with {} entries",
        backend.path().display(),
        backend.len()
    );
    let store = SmartStorage::new(backend, &config).into_handle();

    let report = store.lock().get_health_report();
    info!(
        "Store health: {:?} at {:.1}% usage",
        report.status, report.usage_percent
    );
    for recommendation in &report.recommendations {
        warn!("{}", recommendation);
    }

    let scheduler = Arc::new(TokioScheduler::new());
    let maintenance = MaintenanceScheduler::init(
        store.clone(),
        scheduler.clone(),
        MaintenanceSettings::from_config(&config),
    );

    wait_for_shutdown(&scheduler).await?;

    maintenance.destroy();
    let stats = store.lock().get_stats();
    info!(
        "Shutdown complete: {} valid entries, {} bytes",
        stats.valid_items, stats.total_size
    );
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, forwarding SIGUSR1 to the scheduler as
/// [`HostSignal::StorageChanged`] in the meantime.
#[cfg(unix)]
async fn wait_for_shutdown(scheduler: &TokioScheduler) -> anyhow::Result<()> {
    use signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate =
        unix_signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut storage_changed =
        unix_signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                info!("Received Ctrl+C, initiating shutdown...");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
                return Ok(());
            }
            _ = storage_changed.recv() => {
                info!("Received SIGUSR1, checking storage pressure");
                tokio::task::block_in_place(|| scheduler.emit(HostSignal::StorageChanged));
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_scheduler: &TokioScheduler) -> anyhow::Result<()> {
    signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("Received Ctrl+C, initiating shutdown...");
    Ok(())
}
