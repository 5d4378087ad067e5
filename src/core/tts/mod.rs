pub mod base;
pub mod elevenlabs;

pub use base::{
    AudioChunkCallback, BaseTts, CompleteCallback, TtsConfig, TtsError, TtsErrorCallback,
};
pub use elevenlabs::ElevenLabsTts;

/// Factory function to create the configured TTS adapter.
pub fn create_tts_provider(config: TtsConfig) -> Result<Box<dyn BaseTts>, TtsError> {
    Ok(Box::new(ElevenLabsTts::new(config)?))
}

#[cfg(test)]
mod factory_tests {
    use super::*;

    #[test]
    fn test_create_provider_requires_api_key() {
        let result = create_tts_provider(TtsConfig::default());
        assert!(matches!(result, Err(TtsError::Configuration(_))));
    }

    #[test]
    fn test_create_provider() {
        let config = TtsConfig {
            api_key: "xi-test".to_string(),
            voice_id: "voice-1".to_string(),
            ..Default::default()
        };
        let tts = create_tts_provider(config).unwrap();
        assert!(!tts.is_connected());
        assert_eq!(tts.info().name, "elevenlabs");
    }
}
