//! Process-wide session registry with timed reaping.
//!
//! Constructed once at startup and injected by reference into each
//! orchestrator; there is no hidden global. The registry holds shared
//! handles for lookup only — each session's providers and buffers are
//! owned by its orchestrator task, so the reaper destroys a session by
//! cancelling its shutdown token and removing the entry; the owning
//! orchestrator performs the defensive provider disconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::record::Session;

/// How often the reaper wakes to scan for idle sessions.
pub const REAPER_TICK: Duration = Duration::from_secs(60);

/// In-process mapping from session identifier to session record.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    session_timeout: Duration,
    max_history: usize,
}

impl SessionRegistry {
    pub fn new(session_timeout: Duration, max_history: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            session_timeout,
            max_history,
        })
    }

    /// Create and register a new session with a fresh random identifier.
    pub fn create_session(&self, metadata: HashMap<String, String>) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone(), metadata, self.max_history));
        session.flags.set_active(true);
        self.sessions.insert(id.clone(), session.clone());
        info!(session_id = %id, "Session created");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    /// Remove a session from the registry. Idempotent.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| {
            session.flags.set_active(false);
            info!(session_id = %id, "Session removed");
            session
        })
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// One reaper pass: cancel and remove every session idle past the
    /// timeout. Returns how many were reaped.
    pub fn reap_expired(&self) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.idle_for() > self.session_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &expired {
            if let Some((_, session)) = self.sessions.remove(id) {
                info!(
                    session_id = %id,
                    idle_secs = session.idle_for().as_secs(),
                    "Reaping idle session"
                );
                session.flags.set_active(false);
                // The owning orchestrator observes this and tears down
                // providers and buffers.
                session.shutdown.cancel();
            }
        }

        expired.len()
    }

    /// Spawn the background reaper task at the standard tick.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.spawn_reaper_with_tick(REAPER_TICK)
    }

    /// Spawn the reaper with a custom tick. Test hook.
    pub fn spawn_reaper_with_tick(self: &Arc<Self>, tick: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick carries no information
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let reaped = registry.reap_expired();
                if reaped > 0 {
                    debug!(reaped, "Reaper pass complete");
                }
            }
        })
    }
}
