//! field-guard server.
//!
//! Request validation and abuse defense in front of the geospatial and
//! generative backends.
//!
//! ```text
//!     Client ──▶ body guard ──▶ class rate limit ──▶ prompt / geometry check ──▶ handler ──▶ upstream
//!                     │                 │                      │
//!                     └─────────────────┴──────────────────────┴──▶ DefenseError ──▶ JSON + audit log
//! ```
//!
//! The config path is the first argument, else `FIELD_GUARD_CONFIG`, else
//! built-in defaults.

use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use field_guard::config::{load_config, validation::validate_config, ConfigError, GuardConfig};
use field_guard::config::watcher::ConfigWatcher;
use field_guard::http::GuardServer;
use field_guard::lifecycle::{wait_for_signal, Shutdown};
use field_guard::observability::{logging, metrics};

const CONFIG_ENV: &str = "FIELD_GUARD_CONFIG";

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    let config = match &path {
        Some(path) => load_config(path)?,
        None => {
            let config = GuardConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            config
        }
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "field-guard starting");
    tracing::info!(
        config = ?path,
        bind_address = %config.listener.bind_address,
        environment = ?config.errors.environment,
        rate_limiting = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must stay alive for reloads to be delivered.
    let (_watcher, config_updates) = match &path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = GuardServer::new(config)?;
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(server.run(listener, config_updates, server_shutdown));

    wait_for_signal().await;
    shutdown.trigger();

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
