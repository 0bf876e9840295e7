//! Thermal Stream Server Binary
//!
//! Starts the time-series playback server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin thermal-stream-server
//! ```
//!
//! # Environment Variables
//!
//! - `THERMAL_HOST`: Bind address (default: 0.0.0.0)
//! - `THERMAL_PORT`: Bind port (default: 8888)
//! - `THERMAL_DATA_DIR`: Directory holding oecd.db, ftse250.db, sp500.db (default: ./data)
//! - `THERMAL_TICK_INTERVAL_MS`: Wall-clock tick period (default: 1000)
//! - `THERMAL_BULK_SIZE`: Records per bulk (default: 30)
//! - `THERMAL_BROADCAST_CAPACITY`: Broadcast channel capacity (default: 1024)
//! - `THERMAL_SQLITE_BUSY_TIMEOUT_MS`: SQLite busy timeout (default: 5000)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: thermal-stream-server)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thermal_stream_server::infrastructure::catalog::{CatalogSettings, DataSetCatalog};
use thermal_stream_server::infrastructure::server::{self, AppState};
use thermal_stream_server::infrastructure::telemetry;
use thermal_stream_server::{ServerConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Thermal Stream Server");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = ServerConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let catalog = DataSetCatalog::builtin(&CatalogSettings::from(&config))
        .context("invalid data-set catalog")?;
    for data_set in catalog.iter() {
        tracing::info!(
            data_set = data_set.id(),
            store = %data_set.store().path().display(),
            available = data_set.store().is_available(),
            time_factor = %data_set.session_settings().time_factor,
            broadcast = data_set.broadcaster().is_some(),
            "Data set registered"
        );
    }

    let shutdown_token = CancellationToken::new();
    let state = Arc::new(AppState::new(catalog, shutdown_token.clone()));

    let listener = server::bind(config.server.bind_addr()).await?;
    let server_task = tokio::spawn(server::serve(listener, Arc::clone(&state)));

    tracing::info!("Playback server ready");

    await_shutdown(shutdown_token).await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => tracing::error!(error = %e, "Server task panicked"),
        Err(_) => tracing::warn!(
            open_sessions = state.sessions().total(),
            "Graceful shutdown timed out"
        ),
    }

    tracing::info!("Thermal Stream Server stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        addr = %config.server.bind_addr(),
        data_dir = %config.storage.data_dir.display(),
        tick_interval_ms = config.playback.tick_interval.as_millis(),
        bulk_size = config.playback.bulk_size.get(),
        "Configuration loaded"
    );
    tracing::debug!(
        busy_timeout_ms = config.storage.busy_timeout.as_millis(),
        broadcast_capacity = config.broadcast.capacity,
        "Store and broadcast settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                if let Err(e) = dotenvy::from_path(&env_path) {
                    eprintln!("Failed to load {}: {e}", env_path.display());
                }
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
