//! Shared application state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::session::SessionRegistry;

/// State shared across handlers: configuration and the injected session
/// registry. The registry's reaper task starts with the state.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry =
            SessionRegistry::new(config.session_timeout(), config.max_history_messages);
        registry.spawn_reaper();

        Arc::new(Self {
            config,
            registry,
            started_at: Instant::now(),
        })
    }

    /// Process uptime, for the health endpoint.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
