//! Deepgram-specific STT configuration.

use crate::core::stt::base::SttConfig;

/// Default Deepgram streaming endpoint.
pub const DEEPGRAM_STT_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Deepgram streaming STT configuration.
#[derive(Debug, Clone)]
pub struct DeepgramSttConfig {
    /// Base STT configuration (api_key, model, language, junk phrases).
    pub base: SttConfig,
    /// WebSocket endpoint, overridable for tests and proxies.
    pub endpoint: String,
    /// Emit interim (non-final) transcripts.
    pub interim_results: bool,
    /// Apply punctuation and capitalization.
    pub smart_format: bool,
    /// Silence window (ms) after which Deepgram emits an utterance-end marker.
    pub utterance_end_ms: u32,
}

impl DeepgramSttConfig {
    pub fn from_base(base: SttConfig) -> Self {
        Self {
            base,
            endpoint: DEEPGRAM_STT_URL.to_string(),
            interim_results: true,
            smart_format: true,
            utterance_end_ms: 1000,
        }
    }

    /// Build the full WebSocket URL with query parameters.
    pub fn build_websocket_url(&self) -> String {
        format!(
            "{}?model={}&language={}&interim_results={}&smart_format={}&utterance_end_ms={}&vad_events=true",
            self.endpoint,
            self.base.model,
            self.base.language,
            self.interim_results,
            self.smart_format,
            self.utterance_end_ms,
        )
    }
}
