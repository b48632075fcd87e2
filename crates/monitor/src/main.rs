//! Monitor binary that reconciles bridge burns and mints across chains.

use std::io;

use bridge_monitor::{run_monitor, MonitorError};
use bridge_monitor_domain::config::MonitorConfig;
use bridge_monitor_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use bridge_monitor_storage::SeaOrmStorage;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = MonitorConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    init_telemetry(&telemetry_config)?;
    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    run_monitor(config, storage).await
}
