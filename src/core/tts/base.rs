//! Base trait and shared types for streaming text-to-speech adapters.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::core::ProviderInfo;

/// How long `connect` waits for the synthesizer before rejecting.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by TTS adapters.
#[derive(Debug, Clone, Error)]
pub enum TtsError {
    /// Authentication or reachability failure while establishing the
    /// upstream connection.
    #[error("tts provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// `connect` did not complete within [`CONNECT_TIMEOUT`].
    #[error("tts connect timed out after {0:?}")]
    Timeout(Duration),

    /// Operation requires a live connection.
    #[error("tts adapter is not connected")]
    NotConnected,

    /// Transport failure on an established connection.
    #[error("tts network error: {0}")]
    Network(String),

    /// Invalid adapter configuration.
    #[error("tts configuration error: {0}")]
    Configuration(String),

    /// The synthesizer rejected submitted text.
    #[error("tts synthesis error: {0}")]
    Synthesis(String),
}

/// Callback for synthesized audio delivery. Single sink per adapter.
pub type AudioChunkCallback =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback fired when the synthesizer finishes the current utterance.
pub type CompleteCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for error delivery. Single sink per adapter.
pub type TtsErrorCallback =
    Arc<dyn Fn(TtsError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Configuration for TTS adapters.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model: String,
    /// Base endpoint, overridable for tests and proxies.
    pub endpoint: String,
    /// Voice stability in 0.0..=1.0.
    pub stability: f32,
    /// Voice similarity boost in 0.0..=1.0.
    pub similarity_boost: f32,
    /// Text-buffer sizes the synthesizer uses to trade latency for
    /// quality on the first, second, ... audio chunks.
    pub chunk_length_schedule: Vec<u32>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: String::new(),
            model: "eleven_flash_v2_5".to_string(),
            endpoint: "wss://api.elevenlabs.io/v1/text-to-speech".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            chunk_length_schedule: vec![120, 160, 250, 290],
        }
    }
}

/// Unified streaming text-to-speech interface.
///
/// The cancellation contract is the critical part: `cancel` drops all
/// pending and in-flight synthesis WITHOUT closing the provider
/// connection. After `cancel`, the next `synthesize` call must produce
/// audio and must never receive chunks from the cancelled work.
#[async_trait]
pub trait BaseTts: Send {
    /// Open the streaming text-to-audio channel.
    async fn connect(&mut self) -> Result<(), TtsError>;

    /// Send the end-of-stream sentinel upstream, drain briefly, close.
    async fn disconnect(&mut self) -> Result<(), TtsError>;

    /// Whether the adapter holds a live upstream connection.
    fn is_connected(&self) -> bool;

    /// Submit text for synthesis. `flush = true` signals end of a
    /// semantic unit: emit the audio now. Non-flush submissions may be
    /// coalesced upstream. Clears the cancelled state.
    async fn synthesize(&mut self, text: &str, flush: bool) -> Result<(), TtsError>;

    /// Drop pending and in-flight synthesis for this session without
    /// closing the connection. Non-blocking; no-op when idle.
    fn cancel(&self);

    /// Register the single audio sink.
    fn on_audio_chunk(&mut self, callback: AudioChunkCallback) -> Result<(), TtsError>;

    /// Register the single completion sink.
    fn on_complete(&mut self, callback: CompleteCallback) -> Result<(), TtsError>;

    /// Register the single error sink.
    fn on_error(&mut self, callback: TtsErrorCallback) -> Result<(), TtsError>;

    /// Provider descriptor.
    fn info(&self) -> ProviderInfo;
}
