//! Whisper-specific STT configuration.

use std::time::Duration;

use crate::core::stt::base::SttConfig;

/// Default one-shot transcription endpoint.
pub const WHISPER_STT_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Minimum chunk size worth transcribing (~1 s of compressed voice).
/// Smaller chunks are accumulated rather than submitted.
pub const MIN_UTTERANCE_BYTES: usize = 30 * 1024;

/// How often the sweep inspects the accumulator for undersized chunks
/// that have grown past the threshold.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Accumulator cap to prevent unbounded growth from a silent client.
pub const MAX_BUFFER_BYTES: usize = 20 * 1024 * 1024;

/// Buffered Whisper STT configuration.
#[derive(Debug, Clone)]
pub struct WhisperSttConfig {
    /// Base STT configuration (api_key, model, language, junk phrases).
    pub base: SttConfig,
    /// Transcription endpoint, overridable for tests and proxies.
    pub endpoint: String,
    /// Minimum submittable chunk size in bytes.
    pub min_utterance_bytes: usize,
    /// Accumulator sweep interval.
    pub sweep_interval: Duration,
    /// Accumulator cap in bytes.
    pub max_buffer_bytes: usize,
}

impl WhisperSttConfig {
    pub fn from_base(base: SttConfig) -> Self {
        Self {
            base,
            endpoint: WHISPER_STT_URL.to_string(),
            min_utterance_bytes: MIN_UTTERANCE_BYTES,
            sweep_interval: SWEEP_INTERVAL,
            max_buffer_bytes: MAX_BUFFER_BYTES,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base.api_key.is_empty() {
            return Err("API key is required for the buffered recognizer".to_string());
        }
        if self.min_utterance_bytes == 0 {
            return Err("min_utterance_bytes must be non-zero".to_string());
        }
        if self.max_buffer_bytes < self.min_utterance_bytes {
            return Err("max_buffer_bytes must be at least min_utterance_bytes".to_string());
        }
        Ok(())
    }
}
