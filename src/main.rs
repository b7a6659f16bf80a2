//! livecast-core - Main entry point
//!
//! Signaling and session-coordination server for peer-to-peer live streams.

use clap::Parser;
use livecast_core::args::Args;
use livecast_core::config::Config;
use livecast_core::history::HistoryStore;
use livecast_core::web::{self, SharedState};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (mut config, load_error) = match args.load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };
    args.apply_overrides(&mut config);

    // Initialize logging
    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("LIVECAST_LOG").unwrap_or(log_level))
        .init();

    info!("livecast-core v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Loaded configuration from {:?}", args.config),
        Some(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let history = match HistoryStore::open(&config.history.database_path) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open history database: {}", e);
            return Err(e.into());
        }
    };

    let state = Arc::new(SharedState::new(config, history));

    // Start HTTP server with signaling endpoint
    let http_server = web::run_http_server(state.clone());
    let mut http_handle = task::spawn(async move {
        if let Err(e) = http_server.await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = shutdown => {
            info!("Initiating graceful shutdown...");
        }
        result = &mut http_handle => {
            log_async_task_result("HTTP server", result);
        }
    }

    if !http_handle.is_finished() {
        http_handle.abort();
        let _ = http_handle.await;
    }

    state.shutdown(SHUTDOWN_GRACE).await;
    info!("livecast-core stopped");

    Ok(())
}

fn log_async_task_result(task: &str, result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => warn!("{} stopped unexpectedly", task),
        Err(err) => error!("{} join error: {}", task, err),
    }
}
