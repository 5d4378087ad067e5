pub mod base;
pub mod deepgram;
pub mod whisper;

// Re-export public types and traits
pub use base::{
    is_suppressed_transcript, BaseStt, SttConfig, SttError, SttErrorCallback, TranscriptCallback,
    TranscriptResult, CONNECT_TIMEOUT,
};

pub use deepgram::{DeepgramStt, DeepgramSttConfig};
pub use whisper::{WhisperStt, WhisperSttConfig};

/// Supported STT adapter families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SttProviderKind {
    /// True-streaming WebSocket recognizer with interim transcripts.
    Streaming,
    /// Buffered one-shot recognizer; final transcripts only.
    Buffered,
}

impl std::fmt::Display for SttProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SttProviderKind::Streaming => write!(f, "streaming"),
            SttProviderKind::Buffered => write!(f, "buffered"),
        }
    }
}

impl std::str::FromStr for SttProviderKind {
    type Err = SttError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "streaming" | "deepgram" => Ok(SttProviderKind::Streaming),
            "buffered" | "whisper" => Ok(SttProviderKind::Buffered),
            _ => Err(SttError::Configuration(format!(
                "Unsupported STT provider: {s}. Supported providers: streaming, buffered"
            ))),
        }
    }
}

/// Factory function to create an STT adapter by kind.
pub fn create_stt_provider(
    kind: SttProviderKind,
    config: SttConfig,
) -> Result<Box<dyn BaseStt>, SttError> {
    match kind {
        SttProviderKind::Streaming => Ok(Box::new(DeepgramStt::new(config)?)),
        SttProviderKind::Buffered => Ok(Box::new(WhisperStt::new(config)?)),
    }
}
