//! Deepgram STT WebSocket client implementation.
//!
//! Maintains a persistent connection to the recognizer and forwards each
//! inbound audio frame verbatim. Inbound messages are transcription
//! results (interim and final), utterance-end markers, metadata,
//! warnings, and errors.
//!
//! # Architecture
//!
//! The implementation uses a multi-channel architecture for low-latency
//! processing:
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │   send_audio()  │────▶│  ws_tx (mpsc)    │────▶│  WebSocket Task │
//! └─────────────────┘     └──────────────────┘     └────────┬────────┘
//!                                                           │
//!                         ┌──────────────────┐              │
//!                         │  result_tx (mpsc)│◀─────────────┘
//!                         └────────┬─────────┘
//!                                  │
//!                         ┌────────▼─────────┐
//!                         │ Transcript       │────▶ Registered Sink
//!                         │ Forward Task     │
//!                         └──────────────────┘
//! ```
//!
//! Recognized silence (empty transcript) and configured junk phrases are
//! coerced into no event at all, never a false-positive transcript.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::config::DeepgramSttConfig;
use super::messages::{CloseStreamMessage, DeepgramMessage, KeepAliveMessage};
use crate::core::stt::base::{
    is_suppressed_transcript, BaseStt, SttConfig, SttError, SttErrorCallback, TranscriptCallback,
    TranscriptResult, CONNECT_TIMEOUT,
};
use crate::core::ProviderInfo;

// =============================================================================
// Constants
// =============================================================================

/// Per-message idle timeout for WebSocket message reception.
/// Resets after each successful message. Catches stuck connections.
const WS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between KeepAlive control frames while the connection is idle.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(8);

/// Bounded audio channel size. `send_audio` drops frames instead of
/// blocking when the connection task falls behind.
const AUDIO_CHANNEL_SIZE: usize = 64;

/// Bounded result/error channel sizes.
const RESULT_CHANNEL_SIZE: usize = 256;
const ERROR_CHANNEL_SIZE: usize = 64;

// =============================================================================
// Type Aliases
// =============================================================================

type SharedTranscriptCallback = Arc<Mutex<Option<TranscriptCallback>>>;
type SharedErrorCallback = Arc<Mutex<Option<SttErrorCallback>>>;

// =============================================================================
// DeepgramStt Client
// =============================================================================

/// Deepgram streaming STT client.
pub struct DeepgramStt {
    config: DeepgramSttConfig,

    /// Audio frame sender into the connection task.
    ws_sender: Option<mpsc::Sender<Bytes>>,

    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Connection task handle.
    connection_handle: Option<tokio::task::JoinHandle<()>>,

    /// Transcript forwarding task handle.
    transcript_forward_handle: Option<tokio::task::JoinHandle<()>>,

    /// Error forwarding task handle.
    error_forward_handle: Option<tokio::task::JoinHandle<()>>,

    /// Registered transcript sink, shared with the forwarding task.
    transcript_callback: SharedTranscriptCallback,

    /// Registered error sink, shared with the forwarding task.
    error_callback: SharedErrorCallback,

    /// Connection state flag, shared with the connection task.
    is_connected: Arc<AtomicBool>,
}

impl DeepgramStt {
    /// Create a new client. Fails fast on missing credentials.
    pub fn new(config: SttConfig) -> Result<Self, SttError> {
        if config.api_key.is_empty() {
            return Err(SttError::Configuration(
                "API key is required for the streaming recognizer".to_string(),
            ));
        }

        Ok(Self {
            config: DeepgramSttConfig::from_base(config),
            ws_sender: None,
            shutdown_tx: None,
            connection_handle: None,
            transcript_forward_handle: None,
            error_forward_handle: None,
            transcript_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            is_connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a client with full Deepgram-specific configuration.
    pub fn with_config(config: DeepgramSttConfig) -> Result<Self, SttError> {
        Self::new(config.base.clone()).map(|mut client| {
            client.config = config;
            client
        })
    }

    /// Handle one inbound WebSocket message from the recognizer.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` when the stream closed,
    /// or an error to surface and terminate.
    async fn handle_websocket_message(
        message: Message,
        junk_phrases: &[String],
        result_tx: &mpsc::Sender<TranscriptResult>,
    ) -> Result<bool, SttError> {
        match message {
            Message::Text(text) => {
                match DeepgramMessage::parse(&text) {
                    Ok(DeepgramMessage::Results(payload)) => {
                        if let Some((transcript, confidence)) = payload.transcript() {
                            // Silence and junk phrases produce no event.
                            if is_suppressed_transcript(transcript, junk_phrases) {
                                debug!("Suppressed recognizer output: {:?}", transcript);
                            } else {
                                let result = TranscriptResult::new(
                                    transcript.trim(),
                                    payload.is_final,
                                    confidence,
                                );
                                if result_tx.try_send(result).is_err() {
                                    warn!("Failed to deliver transcript - channel closed or full");
                                }
                            }
                        }
                    }
                    Ok(DeepgramMessage::UtteranceEnd) => {
                        debug!("Recognizer reported utterance end");
                    }
                    Ok(DeepgramMessage::Metadata) => {
                        debug!("Received recognizer metadata");
                    }
                    Ok(DeepgramMessage::Warning(text)) => {
                        warn!("Recognizer warning: {}", text);
                    }
                    Ok(DeepgramMessage::Error(detail)) => {
                        return Err(SttError::Provider(detail));
                    }
                    Ok(DeepgramMessage::Unknown(kind)) => {
                        debug!("Ignoring unknown recognizer message type: {}", kind);
                    }
                    Err(e) => {
                        warn!("Failed to parse recognizer message: {}", e);
                    }
                }
            }
            Message::Close(frame) => {
                info!("Recognizer WebSocket closed: {:?}", frame);
                return Ok(false);
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                debug!("Unexpected binary message from recognizer");
            }
            _ => {}
        }

        Ok(true)
    }

    async fn start_connection(&mut self) -> Result<(), SttError> {
        let ws_url = self.config.build_websocket_url();
        let host = url::Url::parse(&ws_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| {
                SttError::Configuration(format!("Invalid recognizer endpoint: {ws_url}"))
            })?;

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(&ws_url)
            .header("Host", host)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header("Authorization", format!("Token {}", self.config.base.api_key))
            .body(())
            .map_err(|e| {
                SttError::Configuration(format!("Failed to build WebSocket request: {e}"))
            })?;

        // The successful upgrade IS the connection-open event; reject on a
        // bounded wait rather than hanging the session init.
        let (ws_stream, _response) = match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(SttError::ProviderUnavailable(format!(
                    "Failed to connect to recognizer: {e}"
                )));
            }
            Err(_) => return Err(SttError::Timeout(CONNECT_TIMEOUT)),
        };

        info!("Connected to streaming recognizer");

        let (ws_tx, mut ws_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_SIZE);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let (result_tx, mut result_rx) = mpsc::channel::<TranscriptResult>(RESULT_CHANNEL_SIZE);
        let (error_tx, mut error_rx) = mpsc::channel::<SttError>(ERROR_CHANNEL_SIZE);

        self.ws_sender = Some(ws_tx);
        self.shutdown_tx = Some(shutdown_tx);

        let junk_phrases = self.config.base.junk_phrases.clone();
        let is_connected = self.is_connected.clone();
        is_connected.store(true, Ordering::Release);

        let connection_handle = tokio::spawn(async move {
            let (mut ws_sink, mut ws_stream) = ws_stream.split();
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    // Outgoing audio data, forwarded verbatim.
                    Some(audio_data) = ws_rx.recv() => {
                        let data_len = audio_data.len();
                        if let Err(e) = ws_sink.send(Message::Binary(audio_data)).await {
                            let stt_error = SttError::Network(format!(
                                "Failed to send audio to recognizer: {e}"
                            ));
                            error!("{}", stt_error);
                            let _ = error_tx.try_send(stt_error);
                            break;
                        }
                        debug!("Sent {} bytes of audio to recognizer", data_len);
                    }

                    // Keep the upstream connection alive through silence.
                    _ = keepalive.tick() => {
                        if let Ok(json) = serde_json::to_string(&KeepAliveMessage::default()) {
                            if ws_sink.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }

                    // Incoming messages with idle timeout.
                    message = timeout(WS_MESSAGE_TIMEOUT, ws_stream.next()) => {
                        match message {
                            Ok(Some(Ok(msg))) => {
                                match Self::handle_websocket_message(
                                    msg,
                                    &junk_phrases,
                                    &result_tx,
                                ).await {
                                    Ok(true) => {}
                                    Ok(false) => {
                                        is_connected.store(false, Ordering::Release);
                                        break;
                                    }
                                    Err(e) => {
                                        error!("Recognizer streaming error: {}", e);
                                        let _ = error_tx.try_send(e);
                                        // Provider-reported errors keep the
                                        // connection; transport errors do not.
                                    }
                                }
                            }
                            Ok(Some(Err(e))) => {
                                let stt_error = SttError::Network(format!("WebSocket error: {e}"));
                                error!("{}", stt_error);
                                let _ = error_tx.try_send(stt_error);
                                is_connected.store(false, Ordering::Release);
                                break;
                            }
                            Ok(None) => {
                                info!("Recognizer WebSocket stream ended");
                                is_connected.store(false, Ordering::Release);
                                break;
                            }
                            Err(_elapsed) => {
                                let stt_error = SttError::Network(
                                    "WebSocket idle timeout - no message for 60 seconds".into(),
                                );
                                error!("Recognizer idle timeout");
                                let _ = error_tx.try_send(stt_error);
                                is_connected.store(false, Ordering::Release);
                                break;
                            }
                        }
                    }

                    // Graceful shutdown: ask the recognizer to flush first.
                    _ = &mut shutdown_rx => {
                        if let Ok(json) = serde_json::to_string(&CloseStreamMessage::default()) {
                            let _ = ws_sink.send(Message::Text(json.into())).await;
                        }
                        let _ = ws_sink.send(Message::Close(None)).await;
                        is_connected.store(false, Ordering::Release);
                        break;
                    }
                }
            }

            info!("Recognizer WebSocket connection closed");
        });

        self.connection_handle = Some(connection_handle);

        // Transcript forwarding task: single registered sink.
        let callback_ref = self.transcript_callback.clone();
        self.transcript_forward_handle = Some(tokio::spawn(async move {
            while let Some(result) = result_rx.recv().await {
                if let Some(callback) = callback_ref.lock().await.as_ref() {
                    callback(result).await;
                } else {
                    debug!(
                        "Transcript with no registered sink: {:?} (final: {})",
                        result.text, result.is_final
                    );
                }
            }
        }));

        // Error forwarding task.
        let error_callback_ref = self.error_callback.clone();
        self.error_forward_handle = Some(tokio::spawn(async move {
            while let Some(err) = error_rx.recv().await {
                if let Some(callback) = error_callback_ref.lock().await.as_ref() {
                    callback(err).await;
                } else {
                    error!("Recognizer error with no registered sink: {}", err);
                }
            }
        }));

        Ok(())
    }
}

impl Drop for DeepgramStt {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

// =============================================================================
// BaseStt Trait Implementation
// =============================================================================

#[async_trait::async_trait]
impl BaseStt for DeepgramStt {
    async fn connect(&mut self) -> Result<(), SttError> {
        if self.is_connected() {
            return Err(SttError::AlreadyConnected);
        }
        self.start_connection().await
    }

    async fn disconnect(&mut self) -> Result<(), SttError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.connection_handle.take() {
            let _ = timeout(Duration::from_secs(5), handle).await;
        }

        if let Some(handle) = self.transcript_forward_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.error_forward_handle.take() {
            handle.abort();
        }

        self.ws_sender = None;
        self.is_connected.store(false, Ordering::Release);

        info!("Disconnected from streaming recognizer");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire) && self.ws_sender.is_some()
    }

    async fn send_audio(&mut self, audio: Bytes) -> Result<(), SttError> {
        if !self.is_connected() {
            return Err(SttError::NotConnected);
        }

        if let Some(ws_sender) = &self.ws_sender {
            // try_send keeps this callable at frame cadence: when the
            // connection task falls behind, the frame is dropped rather
            // than stalling the session loop.
            match ws_sender.try_send(audio) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Audio channel full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(SttError::Network("audio channel closed".to_string()));
                }
            }
        }

        Ok(())
    }

    async fn on_transcript(&mut self, callback: TranscriptCallback) -> Result<(), SttError> {
        *self.transcript_callback.lock().await = Some(callback);
        Ok(())
    }

    async fn on_error(&mut self, callback: SttErrorCallback) -> Result<(), SttError> {
        *self.error_callback.lock().await = Some(callback);
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "deepgram",
            model: self.config.base.model.clone(),
            language: self.config.base.language.clone(),
            typical_latency_ms: 250,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SttConfig {
        SttConfig {
            api_key: "test_api_key".to_string(),
            model: "nova-2".to_string(),
            language: "es".to_string(),
            junk_phrases: vec!["Thanks for watching".to_string()],
        }
    }

    #[test]
    fn test_new_with_valid_config() {
        let stt = DeepgramStt::new(test_config()).unwrap();
        assert!(!stt.is_connected());
        assert_eq!(stt.info().name, "deepgram");
        assert_eq!(stt.info().model, "nova-2");
    }

    #[test]
    fn test_new_with_empty_api_key() {
        let config = SttConfig {
            api_key: String::new(),
            ..test_config()
        };
        let result = DeepgramStt::new(config);
        assert!(matches!(result, Err(SttError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_send_audio_when_not_connected() {
        let mut stt = DeepgramStt::new(test_config()).unwrap();
        let result = stt.send_audio(Bytes::from_static(&[0u8; 64])).await;
        assert!(matches!(result, Err(SttError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut stt = DeepgramStt::new(test_config()).unwrap();
        assert!(stt.disconnect().await.is_ok());
        assert!(stt.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_unreachable_endpoint() {
        let mut config = DeepgramSttConfig::from_base(test_config());
        config.endpoint = "ws://127.0.0.1:1/listen".to_string();
        let mut stt = DeepgramStt::with_config(config).unwrap();
        let result = stt.connect().await;
        assert!(matches!(
            result,
            Err(SttError::ProviderUnavailable(_)) | Err(SttError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_final_result_delivers_transcript() {
        let (tx, mut rx) = mpsc::channel::<TranscriptResult>(8);
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "channel": {"alternatives": [{"transcript": "hola", "confidence": 0.95}]}
        }"#;
        let cont = DeepgramStt::handle_websocket_message(Message::Text(raw.into()), &[], &tx)
            .await
            .unwrap();
        assert!(cont);

        let result = rx.try_recv().unwrap();
        assert_eq!(result.text, "hola");
        assert!(result.is_final);
    }

    #[tokio::test]
    async fn test_handle_empty_transcript_produces_no_event() {
        let (tx, mut rx) = mpsc::channel::<TranscriptResult>(8);
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "channel": {"alternatives": [{"transcript": "", "confidence": 0.0}]}
        }"#;
        DeepgramStt::handle_websocket_message(Message::Text(raw.into()), &[], &tx)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_junk_phrase_produces_no_event() {
        let junk = vec!["Subtítulos realizados por la comunidad de Amara.org".to_string()];
        let (tx, mut rx) = mpsc::channel::<TranscriptResult>(8);
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "channel": {"alternatives": [{
                "transcript": "Subtítulos realizados por la comunidad de Amara.org",
                "confidence": 0.99
            }]}
        }"#;
        DeepgramStt::handle_websocket_message(Message::Text(raw.into()), &junk, &tx)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_error_message() {
        let (tx, _rx) = mpsc::channel::<TranscriptResult>(8);
        let raw = r#"{"type": "Error", "description": "unsupported encoding"}"#;
        let result =
            DeepgramStt::handle_websocket_message(Message::Text(raw.into()), &[], &tx).await;
        assert!(matches!(result, Err(SttError::Provider(_))));
    }

    #[tokio::test]
    async fn test_handle_close_frame_stops_processing() {
        let (tx, _rx) = mpsc::channel::<TranscriptResult>(8);
        let cont = DeepgramStt::handle_websocket_message(Message::Close(None), &[], &tx)
            .await
            .unwrap();
        assert!(!cont);
    }
}
