//! Frame construction and parsing for the synthesizer WebSocket protocol.
//!
//! Outbound frames:
//! - Beginning-of-stream: voice settings + chunk-length schedule.
//! - Synthesis: `{text, try_trigger_generation}`.
//! - Cancel: `{text: " ", flush: true}`. A single space, NOT empty text:
//!   the empty-text frame is the documented end-of-stream sentinel and
//!   would require reconnecting.
//! - End-of-stream: `{text: ""}`.
//!
//! Inbound frames are JSON envelopes with base64 audio or, in some
//! protocol versions, raw binary audio.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::tts::base::{TtsConfig, TtsError};

/// Beginning-of-stream frame sent right after the socket opens.
pub fn bos_frame(config: &TtsConfig) -> Value {
    json!({
        "text": " ",
        "voice_settings": {
            "stability": config.stability,
            "similarity_boost": config.similarity_boost,
        },
        "generation_config": {
            "chunk_length_schedule": config.chunk_length_schedule,
        },
    })
}

/// Synthesis frame for one text submission.
pub fn synthesize_frame(text: &str, flush: bool) -> Value {
    // Trailing space keeps the synthesizer's tokenizer from gluing this
    // submission onto the next one.
    json!({
        "text": format!("{text} "),
        "try_trigger_generation": flush,
    })
}

/// Cancel frame: flush with a single space.
pub fn cancel_frame() -> Value {
    json!({"text": " ", "flush": true})
}

/// End-of-stream sentinel.
pub fn eos_frame() -> Value {
    json!({"text": ""})
}

/// Parsed inbound JSON envelope.
#[derive(Debug, Default, Deserialize)]
pub struct InboundEnvelope {
    /// Base64-encoded audio, when present.
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    pub is_final: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl InboundEnvelope {
    pub fn parse(raw: &str) -> Result<Self, TtsError> {
        serde_json::from_str(raw)
            .map_err(|e| TtsError::Synthesis(format!("Unparseable synthesizer frame: {e}")))
    }

    /// Decoded audio payload, when the envelope carries one.
    pub fn decode_audio(&self) -> Result<Option<Vec<u8>>, TtsError> {
        match &self.audio {
            Some(encoded) if !encoded.is_empty() => BASE64
                .decode(encoded)
                .map(Some)
                .map_err(|e| TtsError::Synthesis(format!("Invalid base64 audio: {e}"))),
            _ => Ok(None),
        }
    }

    pub fn error_detail(&self) -> Option<String> {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .filter(|m| !m.is_empty())
    }
}
