//! Voice WebSocket message types.
//!
//! One duplex channel per session, two frame kinds: JSON text frames
//! with a `type` discriminator and opaque binary audio frames.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming text frames from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Session start; must be the first frame.
    Init {
        #[serde(default)]
        metadata: HashMap<String, String>,
    },
    /// Metadata update mid-session.
    Metadata {
        metadata: HashMap<String, String>,
    },
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Event discriminators for the `event` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEvent {
    Ready,
    TranscriptPartial,
    TranscriptFinal,
    LlmChunk,
    AgentFinishedSpeaking,
    InterruptionProcessed,
}

/// Error kinds surfaced to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InitError,
    SttError,
    TtsError,
    LlmError,
    AudioProcessingError,
    MessageProcessingError,
    SynthesisError,
}

/// Outgoing text frames to the client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Event {
        event: ServerEvent,
        data: Value,
        /// Milliseconds since the Unix epoch.
        timestamp: u64,
    },
    Error {
        error: ErrorKind,
        message: String,
        timestamp: u64,
    },
}

impl ServerMessage {
    pub fn event(event: ServerEvent, data: Value) -> Self {
        Self::Event {
            event,
            data,
            timestamp: now_ms(),
        }
    }

    pub fn error(error: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error,
            message: message.into(),
            timestamp: now_ms(),
        }
    }
}

/// Wall-clock milliseconds for frame timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Message Routing
// =============================================================================

/// Routing enum for the socket sender task.
#[derive(Debug)]
pub enum ClientRoute {
    /// JSON text frame.
    Message(ServerMessage),
    /// Binary synthesized-audio frame.
    Audio(Bytes),
    /// Close the connection.
    Close,
}

/// Frames flowing from the socket reader into the orchestrator.
#[derive(Debug)]
pub enum ClientFrame {
    Text(String),
    Binary(Bytes),
}
