//! Voice WebSocket route configuration.
//!
//! # Endpoint
//!
//! `GET /v2/voice` - WebSocket upgrade for the realtime voice pipeline
//!
//! # Protocol
//!
//! After the upgrade, the client sends:
//! 1. `{"type": "init", "metadata": {...}}` to start the session
//! 2. Binary audio frames (~100 ms cadence)
//!
//! The server responds with:
//! - `{"type": "event", "event": "ready", ...}` once providers connect
//! - transcript, `llm_chunk`, and lifecycle events
//! - binary frames of synthesized audio
//! - `{"type": "error", ...}` on failures

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::voice::voice_handler;
use crate::state::AppState;

/// Create the voice WebSocket router.
pub fn create_voice_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v2/voice", get(voice_handler))
        .layer(TraceLayer::new_for_http())
}
