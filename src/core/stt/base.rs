//! Base trait and shared types for speech-to-text adapters.
//!
//! Two adapter families implement this contract: a true-streaming
//! WebSocket recognizer and a buffered one-shot recognizer. The
//! orchestrator depends only on the trait; adapters are interchangeable
//! at construction time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::core::ProviderInfo;

/// How long `connect` waits for the upstream recognizer before rejecting.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A transcription result delivered through the transcript sink.
///
/// Partial results carry `is_final = false` and may be superseded; a
/// final result for an utterance is delivered at most once and never
/// retracted. Results arrive in utterance order.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    /// Recognized text.
    pub text: String,
    /// Whether the recognizer will revise this transcript.
    pub is_final: bool,
    /// Recognizer confidence in the range 0.0..=1.0.
    pub confidence: f32,
}

impl TranscriptResult {
    pub fn new(text: impl Into<String>, is_final: bool, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Errors surfaced by STT adapters.
#[derive(Debug, Clone, Error)]
pub enum SttError {
    /// Authentication or reachability failure while establishing the
    /// upstream connection.
    #[error("stt provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// `connect` did not complete within [`CONNECT_TIMEOUT`].
    #[error("stt connect timed out after {0:?}")]
    Timeout(Duration),

    /// `connect` called on an adapter that is already connected.
    #[error("stt adapter is already connected")]
    AlreadyConnected,

    /// Operation requires a live connection.
    #[error("stt adapter is not connected")]
    NotConnected,

    /// Transport failure on an established connection.
    #[error("stt network error: {0}")]
    Network(String),

    /// Invalid adapter configuration.
    #[error("stt configuration error: {0}")]
    Configuration(String),

    /// Error reported by the recognizer itself. Non-fatal to the session.
    #[error("stt provider error: {0}")]
    Provider(String),
}

impl SttError {
    /// Connection-class errors terminate the session; provider-reported
    /// transcription errors do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SttError::Provider(_))
    }
}

/// Callback type for transcript delivery. Single sink per adapter.
pub type TranscriptCallback = Arc<
    dyn Fn(TranscriptResult) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

/// Callback type for error delivery. Single sink per adapter.
pub type SttErrorCallback =
    Arc<dyn Fn(SttError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Configuration shared by all STT adapters.
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// API key for the upstream recognizer.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Recognition language.
    pub language: String,
    /// Transcripts matching any of these (case-insensitive) are
    /// suppressed entirely; the recognizer hallucinates them on silence.
    pub junk_phrases: Vec<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            language: "es".to_string(),
            junk_phrases: Vec::new(),
        }
    }
}

/// Returns true when a transcript must be coerced into no event at all:
/// recognized silence (empty text) or a configured junk phrase.
pub fn is_suppressed_transcript(text: &str, junk_phrases: &[String]) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    junk_phrases
        .iter()
        .any(|phrase| trimmed.eq_ignore_ascii_case(phrase.trim()))
}

/// Unified speech-to-text interface.
///
/// Implementations forward audio to an upstream recognizer and deliver
/// transcripts through the registered sink. `send_audio` must be callable
/// at client frame cadence and never block on upstream I/O.
#[async_trait]
pub trait BaseStt: Send {
    /// Establish upstream resources. Rejects with
    /// [`SttError::Timeout`] after [`CONNECT_TIMEOUT`] and with
    /// [`SttError::AlreadyConnected`] when called twice.
    async fn connect(&mut self) -> Result<(), SttError>;

    /// Flush in-flight work and release resources. Idempotent.
    async fn disconnect(&mut self) -> Result<(), SttError>;

    /// Whether the adapter holds a live upstream connection.
    fn is_connected(&self) -> bool;

    /// Accept one opaque audio frame from the client.
    async fn send_audio(&mut self, audio: Bytes) -> Result<(), SttError>;

    /// Register the single transcript sink.
    async fn on_transcript(&mut self, callback: TranscriptCallback) -> Result<(), SttError>;

    /// Register the single error sink.
    async fn on_error(&mut self, callback: SttErrorCallback) -> Result<(), SttError>;

    /// Provider descriptor.
    fn info(&self) -> ProviderInfo;
}
