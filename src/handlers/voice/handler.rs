//! Voice WebSocket socket edge.
//!
//! Upgrades the HTTP connection, splits the socket into a dedicated
//! sender task and a reader pump, and hands both ends to a
//! [`VoiceOrchestrator`] that owns the session for the lifetime of the
//! connection.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::messages::{ClientFrame, ClientRoute};
use super::orchestrator::{OrchestratorSettings, ProviderFactory, ProviderSet, VoiceOrchestrator};
use crate::config::ServerConfig;
use crate::core::llm::{create_llm_provider, LlmConfig};
use crate::core::stt::{
    create_stt_provider, BaseStt, DeepgramStt, DeepgramSttConfig, SttConfig, SttProviderKind,
};
use crate::core::tts::{create_tts_provider, TtsConfig};
use crate::errors::AppError;
use crate::state::AppState;

/// Channel buffer size for socket-adjacent queues.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (2 MB; audio frames are ~100 ms each).
const MAX_WS_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Maximum WebSocket message size (2 MB).
const MAX_WS_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Voice WebSocket handler.
///
/// Upgrades the HTTP connection to WebSocket for bidirectional voice
/// streaming: inbound microphone audio, outbound events and synthesized
/// audio.
pub async fn voice_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Voice WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_voice_socket(socket, state))
}

/// Construct the session's provider set from server configuration.
pub fn build_providers(config: &ServerConfig) -> Result<ProviderSet, AppError> {
    let stt: Box<dyn BaseStt> = match config.stt_provider {
        SttProviderKind::Streaming => {
            let api_key = config.deepgram_api_key.clone().ok_or_else(|| {
                AppError::Configuration(
                    "DEEPGRAM_API_KEY is required for the streaming STT provider".to_string(),
                )
            })?;
            let model = if config.stt_model.is_empty() {
                "nova-2".to_string()
            } else {
                config.stt_model.clone()
            };
            let mut stt_config = DeepgramSttConfig::from_base(SttConfig {
                api_key,
                model,
                language: config.stt_language.clone(),
                junk_phrases: config.stt_junk_phrases.clone(),
            });
            // The configured silence window doubles as the recognizer's
            // utterance-end boundary.
            stt_config.utterance_end_ms = config.max_silence_ms;
            Box::new(DeepgramStt::with_config(stt_config)?)
        }
        SttProviderKind::Buffered => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                AppError::Configuration(
                    "OPENAI_API_KEY is required for the buffered STT provider".to_string(),
                )
            })?;
            let model = if config.stt_model.is_empty() {
                "whisper-1".to_string()
            } else {
                config.stt_model.clone()
            };
            create_stt_provider(
                SttProviderKind::Buffered,
                SttConfig {
                    api_key,
                    model,
                    language: config.stt_language.clone(),
                    junk_phrases: config.stt_junk_phrases.clone(),
                },
            )?
        }
    };

    let llm_api_key = config.openai_api_key.clone().ok_or_else(|| {
        AppError::Configuration("OPENAI_API_KEY is required for the LLM provider".to_string())
    })?;
    let llm = create_llm_provider(LlmConfig {
        api_key: llm_api_key,
        model: config.llm_model.clone(),
        temperature: config.llm_temperature,
        max_tokens: config.llm_max_tokens,
        system_prompt: config.llm_system_prompt.clone(),
        ..Default::default()
    })?;

    let tts_api_key = config.elevenlabs_api_key.clone().ok_or_else(|| {
        AppError::Configuration("ELEVENLABS_API_KEY is required for the TTS provider".to_string())
    })?;
    if config.tts_voice_id.is_empty() {
        return Err(AppError::Configuration(
            "TTS_VOICE_ID is required for the TTS provider".to_string(),
        ));
    }
    let tts = create_tts_provider(TtsConfig {
        api_key: tts_api_key,
        voice_id: config.tts_voice_id.clone(),
        model: config.tts_model.clone(),
        ..Default::default()
    })?;

    Ok(ProviderSet { stt, llm, tts })
}

/// Handle one voice WebSocket connection end to end.
async fn handle_voice_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Voice WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (client_tx, mut client_rx) = mpsc::channel::<ClientRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing frames.
    let sender_task = tokio::spawn(async move {
        while let Some(route) = client_rx.recv().await {
            let should_close = matches!(route, ClientRoute::Close);

            let result = match route {
                ClientRoute::Message(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                ClientRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                ClientRoute::Close => {
                    info!("Closing voice WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };

            if let Err(e) = result {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if should_close {
                break;
            }
        }
    });

    let config = state.config.clone();
    let factory: ProviderFactory = Box::new(move || build_providers(&config));
    let orchestrator = VoiceOrchestrator::new(
        state.registry.clone(),
        OrchestratorSettings::from_config(&state.config),
        factory,
        client_tx,
    );

    // Reader pump: socket frames into the orchestrator's inbox.
    let (frame_tx, frame_rx) = mpsc::channel::<ClientFrame>(CHANNEL_BUFFER_SIZE);
    let reader_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    debug!("Voice WebSocket receive error: {}", e);
                    break;
                }
            };
            let frame = match message {
                Message::Text(text) => ClientFrame::Text(text.to_string()),
                Message::Binary(data) => ClientFrame::Binary(data),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            if frame_tx.send(frame).await.is_err() {
                break;
            }
        }
        // Dropping frame_tx ends the orchestrator loop.
    });

    orchestrator.run(frame_rx).await;

    reader_task.abort();
    sender_task.abort();
    info!("Voice WebSocket connection terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> ServerConfig {
        ServerConfig {
            deepgram_api_key: Some("dg-key".to_string()),
            openai_api_key: Some("sk-key".to_string()),
            elevenlabs_api_key: Some("xi-key".to_string()),
            tts_voice_id: "voice-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_providers_full_config() {
        let providers = build_providers(&full_config()).unwrap();
        assert_eq!(providers.stt.info().name, "deepgram");
        assert_eq!(providers.stt.info().model, "nova-2");
        assert_eq!(providers.llm.info().name, "openai");
        assert_eq!(providers.tts.info().name, "elevenlabs");
    }

    #[test]
    fn test_build_providers_buffered_stt_defaults_model() {
        let config = ServerConfig {
            stt_provider: SttProviderKind::Buffered,
            ..full_config()
        };
        let providers = build_providers(&config).unwrap();
        assert_eq!(providers.stt.info().name, "whisper");
        assert_eq!(providers.stt.info().model, "whisper-1");
    }

    #[test]
    fn test_build_providers_missing_stt_key() {
        let config = ServerConfig {
            deepgram_api_key: None,
            ..full_config()
        };
        let err = build_providers(&config).unwrap_err();
        assert!(err.to_string().contains("DEEPGRAM_API_KEY"));
    }

    #[test]
    fn test_build_providers_missing_llm_key() {
        let config = ServerConfig {
            openai_api_key: None,
            ..full_config()
        };
        let err = build_providers(&config).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_build_providers_missing_voice() {
        let config = ServerConfig {
            tts_voice_id: String::new(),
            ..full_config()
        };
        let err = build_providers(&config).unwrap_err();
        assert!(err.to_string().contains("TTS_VOICE_ID"));
    }
}
