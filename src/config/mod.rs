//! Configuration module for the voxgate server
//!
//! Configuration is environment-style key/value pairs, loaded from process
//! environment variables with `.env` support via dotenvy. Priority:
//! process environment > `.env` values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use voxgate::config::ServerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?;
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::core::stt::SttProviderKind;
use crate::errors::AppError;

/// Default maximum number of history turns kept per session.
pub const DEFAULT_MAX_HISTORY: usize = 15;

/// Default session inactivity timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 1_800_000;

/// Transcripts the recognizer hallucinates on silence or background noise.
/// Matched case-insensitively; a match suppresses the transcript entirely.
const DEFAULT_JUNK_PHRASES: &[&str] = &[
    "Subtítulos realizados por la comunidad de Amara.org",
    "Subtitled by the Amara.org community",
    "Gracias por ver el video",
    "Thanks for watching",
];

/// Server configuration
///
/// Contains everything needed to run the voxgate server:
/// - Server settings (host, port, mode)
/// - Provider API keys and model selection (STT, LLM, TTS)
/// - Audio thresholds
/// - Session bounds (history, inactivity timeout)
/// - Observability toggles
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    /// Selects the realtime pipeline. When false the gateway only serves
    /// the HTTP surface and reports `legacy` mode; the legacy blocking
    /// handler lives outside this crate.
    pub enable_realtime: bool,

    // STT settings
    pub stt_provider: SttProviderKind,
    pub deepgram_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub stt_model: String,
    pub stt_language: String,
    /// Phrases coerced into "no transcript at all".
    pub stt_junk_phrases: Vec<String>,

    // LLM settings
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_system_prompt: String,

    // TTS settings
    pub elevenlabs_api_key: Option<String>,
    pub tts_voice_id: String,
    pub tts_model: String,

    // Audio settings
    pub audio_chunk_size_ms: u32,
    pub max_silence_ms: u32,
    /// Minimum binary-frame size treated as voiced input for barge-in.
    pub vad_threshold_bytes: usize,

    // Session settings
    pub max_history_messages: usize,
    pub session_timeout_ms: u64,
    /// When true, a barge-in appends the partially spoken reply to
    /// history instead of dropping it.
    pub keep_interrupted_replies: bool,

    // Observability
    pub enable_metrics: bool,
    pub debug_audio: bool,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_realtime: true,
            stt_provider: SttProviderKind::Streaming,
            deepgram_api_key: None,
            openai_api_key: None,
            // Empty selects the provider-family default (nova-2 streaming,
            // whisper-1 buffered).
            stt_model: String::new(),
            stt_language: "es".to_string(),
            stt_junk_phrases: DEFAULT_JUNK_PHRASES.iter().map(|s| s.to_string()).collect(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.7,
            llm_max_tokens: 300,
            llm_system_prompt: "You are a helpful voice assistant. Keep replies short; they will be spoken aloud.".to_string(),
            elevenlabs_api_key: None,
            tts_voice_id: String::new(),
            tts_model: "eleven_flash_v2_5".to_string(),
            audio_chunk_size_ms: 100,
            max_silence_ms: 1500,
            vad_threshold_bytes: 1000,
            max_history_messages: DEFAULT_MAX_HISTORY,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            keep_interrupted_replies: false,
            enable_metrics: false,
            debug_audio: false,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let config = Self {
            host: env_string("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port)?,
            enable_realtime: env_bool("ENABLE_REALTIME", defaults.enable_realtime)?,
            stt_provider: match env::var("STT_PROVIDER") {
                Ok(raw) => SttProviderKind::from_str(&raw)
                    .map_err(|e| AppError::Configuration(e.to_string()))?,
                Err(_) => defaults.stt_provider,
            },
            deepgram_api_key: env_opt("DEEPGRAM_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            stt_model: env_string("STT_MODEL", &defaults.stt_model),
            stt_language: env_string("STT_LANGUAGE", &defaults.stt_language),
            stt_junk_phrases: env_list("STT_JUNK_PHRASES")
                .unwrap_or(defaults.stt_junk_phrases),
            llm_model: env_string("LLM_MODEL", &defaults.llm_model),
            llm_temperature: env_parse("LLM_TEMPERATURE", defaults.llm_temperature)?,
            llm_max_tokens: env_parse("LLM_MAX_TOKENS", defaults.llm_max_tokens)?,
            llm_system_prompt: env_string("LLM_SYSTEM_PROMPT", &defaults.llm_system_prompt),
            elevenlabs_api_key: env_opt("ELEVENLABS_API_KEY"),
            tts_voice_id: env_string("TTS_VOICE_ID", &defaults.tts_voice_id),
            tts_model: env_string("TTS_MODEL", &defaults.tts_model),
            audio_chunk_size_ms: env_parse("AUDIO_CHUNK_SIZE_MS", defaults.audio_chunk_size_ms)?,
            max_silence_ms: env_parse("MAX_SILENCE_MS", defaults.max_silence_ms)?,
            vad_threshold_bytes: env_parse("VAD_THRESHOLD_BYTES", defaults.vad_threshold_bytes)?,
            max_history_messages: env_parse("MAX_HISTORY_MESSAGES", defaults.max_history_messages)?,
            session_timeout_ms: env_parse("SESSION_TIMEOUT_MS", defaults.session_timeout_ms)?,
            keep_interrupted_replies: env_bool(
                "KEEP_INTERRUPTED_REPLIES",
                defaults.keep_interrupted_replies,
            )?,
            enable_metrics: env_bool("ENABLE_METRICS", defaults.enable_metrics)?,
            debug_audio: env_bool("DEBUG_AUDIO", defaults.debug_audio)?,
            log_level: env_string("LOG_LEVEL", &defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_history_messages == 0 {
            return Err(AppError::Configuration(
                "MAX_HISTORY_MESSAGES must be at least 1".to_string(),
            ));
        }
        if self.session_timeout_ms == 0 {
            return Err(AppError::Configuration(
                "SESSION_TIMEOUT_MS must be non-zero".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(AppError::Configuration(format!(
                "LLM_TEMPERATURE {} is outside the supported range (0.0-2.0)",
                self.llm_temperature
            )));
        }
        Ok(())
    }

    /// Socket address string the server binds to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Session inactivity timeout as a Duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Human-readable mode string for the health endpoint.
    pub fn mode(&self) -> &'static str {
        if self.enable_realtime { "realtime" } else { "legacy" }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| {
            AppError::Configuration(format!("{key} has an invalid value: {raw:?}"))
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool, AppError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(AppError::Configuration(format!(
                "{key} must be a boolean, got {other:?}"
            ))),
        },
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.enable_realtime);
        assert_eq!(config.stt_provider, SttProviderKind::Streaming);
        assert_eq!(config.max_history_messages, 15);
        assert_eq!(config.session_timeout_ms, 1_800_000);
        assert!(!config.keep_interrupted_replies);
        assert!(config
            .stt_junk_phrases
            .iter()
            .any(|p| p.contains("Amara.org")));
    }

    #[test]
    fn test_address() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_mode_string() {
        let mut config = ServerConfig::default();
        assert_eq!(config.mode(), "realtime");
        config.enable_realtime = false;
        assert_eq!(config.mode(), "legacy");
    }

    #[test]
    fn test_validate_rejects_zero_history() {
        let config = ServerConfig {
            max_history_messages: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let config = ServerConfig {
            llm_temperature: 3.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("LLM_TEMPERATURE"));
    }

    #[test]
    fn test_session_timeout_duration() {
        let config = ServerConfig {
            session_timeout_ms: 60_000,
            ..Default::default()
        };
        assert_eq!(config.session_timeout(), Duration::from_secs(60));
    }
}
