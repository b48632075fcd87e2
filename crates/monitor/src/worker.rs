use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

use bridge_monitor_domain::{
    config::{ConfigError, MonitorConfig},
    services::telemetry::TelemetryError,
    storage::StorageError,
};
use bridge_monitor_storage::SeaOrmStorage;

use crate::{
    alert::{AlertDispatcher, NotifyError},
    reconcile::Reconciler,
    rpc::HttpConnector,
    scanner::ChainScanner,
    sweeper::TimeoutSweeper,
};

/// Startup failures. Anything after startup is handled inside its own task.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("alert channel error: {0}")]
    Notify(#[from] NotifyError),
}

/// Spawns one scanner per configured chain plus the timeout sweeper and waits
/// on all of them.
pub async fn run_monitor(config: MonitorConfig, storage: SeaOrmStorage) -> Result<(), MonitorError> {
    let storage = Arc::new(storage);
    let alerts = Arc::new(AlertDispatcher::from_settings(config.alerts())?);
    let reconciler = Arc::new(Reconciler::new(storage.clone(), alerts.clone()));

    let mut tasks = JoinSet::new();
    tasks.spawn(
        TimeoutSweeper::new(storage.clone(), alerts.clone(), config.check_interval())
            .with_grace(config.stuck_after())
            .run(),
    );

    for chain in config.chains() {
        let scanner = ChainScanner::new(
            chain.clone(),
            config.scan().clone(),
            HttpConnector::new(chain.rpc_url.clone()),
            storage.clone(),
            reconciler.clone(),
        );
        tasks.spawn(scanner.run());
    }
    info!(
        chains = config.chains().len(),
        alert_channels = alerts.channel_count(),
        "monitor tasks started"
    );

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(%err, "monitor task terminated");
        }
    }

    Ok(())
}
