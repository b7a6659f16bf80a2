//! Shared state for livecast-core
//!
//! Handed to every HTTP and WebSocket handler.

use crate::config::Config;
use crate::history::HistoryStore;
use crate::signaling::SignalingHub;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared state for the application
#[derive(Clone)]
pub struct SharedState {
    /// Configuration
    pub config: Arc<Config>,

    /// Signaling hub (connection + stream registries)
    pub hub: Arc<SignalingHub>,

    /// Completed-stream history
    pub history: Arc<HistoryStore>,

    /// Server start time
    pub start_time: Instant,
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("config", &self.config)
            .field("connections", &self.hub.connection_count())
            .finish()
    }
}

impl SharedState {
    /// Create a new shared state
    pub fn new(config: Config, history: HistoryStore) -> Self {
        let hub = SignalingHub::new(config.signaling.outbound_buffer);
        Self {
            config: Arc::new(config),
            hub: Arc::new(hub),
            history: Arc::new(history),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Shutdown the server
    ///
    /// Closes every signaling connection and waits up to `grace` for their
    /// handlers to finish the disconnect cleanup.
    pub async fn shutdown(&self, grace: Duration) {
        let stats = self.hub.stats();
        info!(
            "Shutting down with {} connections and {} active streams",
            stats.connections, stats.active_streams
        );

        self.hub.close_all();
        let deadline = Instant::now() + grace;
        while self.hub.connection_count() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    "{} signaling connections still open after {:?}",
                    self.hub.connection_count(),
                    grace
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        info!("All signaling connections closed");
    }
}
