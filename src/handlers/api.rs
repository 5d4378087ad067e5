//! HTTP health and service-info handlers.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::handlers::voice::messages::now_ms;
use crate::state::AppState;

/// `GET /health`
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "mode": state.config.mode(),
        "timestamp": now_ms(),
        "uptime": state.uptime().as_secs(),
    }))
}

/// `GET /info` — service descriptor.
pub async fn service_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": "voxgate",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.config.mode(),
        "socket_endpoint": "/v2/voice",
        "providers": {
            "stt": state.config.stt_provider.to_string(),
            "llm": state.config.llm_model,
            "tts": state.config.tts_model,
        },
        "audio": {
            "chunk_size_ms": state.config.audio_chunk_size_ms,
            "max_silence_ms": state.config.max_silence_ms,
            "vad_threshold_bytes": state.config.vad_threshold_bytes,
        },
        "active_sessions": state.registry.active_count(),
    }))
}
