//! Top-level application errors.
//!
//! Provider adapters carry their own error enums (`SttError`, `LlmError`,
//! `TtsError`); this type covers everything above them: configuration,
//! provider construction, and server startup.

use thiserror::Error;

use crate::core::llm::LlmError;
use crate::core::stt::SttError;
use crate::core::tts::TtsError;

/// Result alias for application-level operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// STT adapter construction or lifecycle failure.
    #[error("stt provider error: {0}")]
    Stt(#[from] SttError),

    /// LLM adapter construction or lifecycle failure.
    #[error("llm provider error: {0}")]
    Llm(#[from] LlmError),

    /// TTS adapter construction or lifecycle failure.
    #[error("tts provider error: {0}")]
    Tts(#[from] TtsError),

    /// Server startup / bind failure.
    #[error("server error: {0}")]
    Server(String),
}
