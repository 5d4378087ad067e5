//! ElevenLabs streaming TTS client implementation.
//!
//! One persistent WebSocket per session. On open the client sends a
//! beginning-of-stream frame with voice settings and the chunk-length
//! schedule; each `synthesize` becomes a `{text, try_trigger_generation}`
//! frame; inbound audio arrives as JSON envelopes with base64 payloads or
//! raw binary frames, both handled.
//!
//! # Cancellation
//!
//! `cancel` must NOT close the socket. It sends a flush frame containing
//! a single space (empty text is the end-of-stream sentinel and would
//! force a reconnect) and raises an internal `cancelled` flag; audio
//! received while the flag is set is dropped. The next `synthesize`
//! clears the flag. Getting this wrong breaks the first reply after every
//! barge-in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::messages::{bos_frame, cancel_frame, eos_frame, synthesize_frame, InboundEnvelope};
use crate::core::tts::base::{
    AudioChunkCallback, BaseTts, CompleteCallback, TtsConfig, TtsError, TtsErrorCallback,
    CONNECT_TIMEOUT,
};
use crate::core::ProviderInfo;

/// Drain window after the end-of-stream sentinel before closing.
const DISCONNECT_DRAIN: Duration = Duration::from_millis(100);

/// Bounded outbound frame channel size.
const FRAME_CHANNEL_SIZE: usize = 64;

type SharedAudioCallback = Arc<Mutex<Option<AudioChunkCallback>>>;
type SharedCompleteCallback = Arc<Mutex<Option<CompleteCallback>>>;
type SharedErrorCallback = Arc<Mutex<Option<TtsErrorCallback>>>;

/// Callbacks and flags shared with the connection task.
#[derive(Clone)]
struct TtsSinks {
    audio: SharedAudioCallback,
    complete: SharedCompleteCallback,
    error: SharedErrorCallback,
    cancelled: Arc<AtomicBool>,
}

impl TtsSinks {
    async fn deliver_audio(&self, bytes: Bytes) {
        if self.cancelled.load(Ordering::Acquire) {
            debug!("Dropping {} bytes of cancelled synthesis audio", bytes.len());
            return;
        }
        let callback = self.audio.lock().clone();
        if let Some(callback) = callback {
            callback(bytes).await;
        }
    }

    async fn deliver_complete(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        let callback = self.complete.lock().clone();
        if let Some(callback) = callback {
            callback().await;
        }
    }

    async fn deliver_error(&self, err: TtsError) {
        let callback = self.error.lock().clone();
        if let Some(callback) = callback {
            callback(err).await;
        } else {
            warn!("Synthesizer error with no registered sink: {}", err);
        }
    }

    /// Route one inbound WebSocket message. Returns false once the
    /// upstream closed the stream.
    async fn handle_message(&self, message: Message) -> bool {
        match message {
            Message::Text(text) => match InboundEnvelope::parse(&text) {
                Ok(envelope) => {
                    if let Some(detail) = envelope.error_detail() {
                        self.deliver_error(TtsError::Synthesis(detail)).await;
                        return true;
                    }
                    match envelope.decode_audio() {
                        Ok(Some(audio)) => self.deliver_audio(Bytes::from(audio)).await,
                        Ok(None) => {}
                        Err(e) => self.deliver_error(e).await,
                    }
                    if envelope.is_final == Some(true) {
                        self.deliver_complete().await;
                    }
                }
                Err(e) => warn!("{}", e),
            },
            // Some protocol versions stream raw binary audio frames.
            Message::Binary(audio) => self.deliver_audio(audio).await,
            Message::Close(frame) => {
                info!("Synthesizer WebSocket closed: {:?}", frame);
                return false;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {}
        }
        true
    }
}

/// ElevenLabs streaming TTS client.
pub struct ElevenLabsTts {
    config: TtsConfig,

    /// Outbound frame sender into the connection task.
    ws_sender: Option<mpsc::Sender<String>>,

    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Connection task handle.
    connection_handle: Option<tokio::task::JoinHandle<()>>,

    sinks: TtsSinks,

    /// Connection state flag, shared with the connection task.
    is_connected: Arc<AtomicBool>,
}

impl ElevenLabsTts {
    /// Create a new client. Fails fast on missing credentials.
    pub fn new(config: TtsConfig) -> Result<Self, TtsError> {
        if config.api_key.is_empty() {
            return Err(TtsError::Configuration(
                "API key is required for the synthesizer".to_string(),
            ));
        }
        if config.voice_id.is_empty() {
            return Err(TtsError::Configuration(
                "voice_id is required for the synthesizer".to_string(),
            ));
        }

        Ok(Self {
            config,
            ws_sender: None,
            shutdown_tx: None,
            connection_handle: None,
            sinks: TtsSinks {
                audio: Arc::new(Mutex::new(None)),
                complete: Arc::new(Mutex::new(None)),
                error: Arc::new(Mutex::new(None)),
                cancelled: Arc::new(AtomicBool::new(false)),
            },
            is_connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Full stream-input URL for the configured voice.
    fn build_websocket_url(&self) -> String {
        format!(
            "{}/{}/stream-input?model_id={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.voice_id,
            self.config.model,
        )
    }

    async fn start_connection(&mut self) -> Result<(), TtsError> {
        let ws_url = self.build_websocket_url();
        let host = url::Url::parse(&ws_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| {
                TtsError::Configuration(format!("Invalid synthesizer endpoint: {ws_url}"))
            })?;

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(&ws_url)
            .header("Host", host)
            .header("Upgrade", "websocket")
            .header("Connection", "upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .header("xi-api-key", &self.config.api_key)
            .body(())
            .map_err(|e| {
                TtsError::Configuration(format!("Failed to build WebSocket request: {e}"))
            })?;

        let (ws_stream, _response) = match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(TtsError::ProviderUnavailable(format!(
                    "Failed to connect to synthesizer: {e}"
                )));
            }
            Err(_) => return Err(TtsError::Timeout(CONNECT_TIMEOUT)),
        };

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        // Voice settings and the chunk-length schedule go out first; the
        // synthesizer uses the schedule to trade latency for quality on
        // the first audio chunks.
        let bos = bos_frame(&self.config).to_string();
        ws_sink
            .send(Message::Text(bos.into()))
            .await
            .map_err(|e| {
                TtsError::ProviderUnavailable(format!("Failed to send stream settings: {e}"))
            })?;

        info!("Connected to streaming synthesizer");

        let (frame_tx, mut frame_rx) = mpsc::channel::<String>(FRAME_CHANNEL_SIZE);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        self.ws_sender = Some(frame_tx);
        self.shutdown_tx = Some(shutdown_tx);
        self.sinks.cancelled.store(false, Ordering::Release);
        self.is_connected.store(true, Ordering::Release);

        let sinks = self.sinks.clone();
        let is_connected = self.is_connected.clone();

        let connection_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(frame) = frame_rx.recv() => {
                        if let Err(e) = ws_sink.send(Message::Text(frame.into())).await {
                            let err = TtsError::Network(format!(
                                "Failed to send frame to synthesizer: {e}"
                            ));
                            error!("{}", err);
                            sinks.deliver_error(err).await;
                            break;
                        }
                    }

                    message = ws_stream.next() => {
                        match message {
                            Some(Ok(msg)) => {
                                if !sinks.handle_message(msg).await {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                let err = TtsError::Network(format!("WebSocket error: {e}"));
                                error!("{}", err);
                                sinks.deliver_error(err).await;
                                break;
                            }
                            None => {
                                info!("Synthesizer WebSocket stream ended");
                                break;
                            }
                        }
                    }

                    // Graceful shutdown: EOS sentinel, brief drain, close.
                    _ = &mut shutdown_rx => {
                        let _ = ws_sink.send(Message::Text(eos_frame().to_string().into())).await;
                        let drain_deadline = tokio::time::Instant::now() + DISCONNECT_DRAIN;
                        while let Ok(Some(Ok(msg))) =
                            tokio::time::timeout_at(drain_deadline, ws_stream.next()).await
                        {
                            if !sinks.handle_message(msg).await {
                                break;
                            }
                        }
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            is_connected.store(false, Ordering::Release);
            info!("Synthesizer WebSocket connection closed");
        });

        self.connection_handle = Some(connection_handle);
        Ok(())
    }
}

impl Drop for ElevenLabsTts {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

#[async_trait::async_trait]
impl BaseTts for ElevenLabsTts {
    async fn connect(&mut self) -> Result<(), TtsError> {
        if self.is_connected() {
            return Ok(());
        }
        self.start_connection().await
    }

    async fn disconnect(&mut self) -> Result<(), TtsError> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.connection_handle.take() {
            let _ = timeout(Duration::from_secs(5), handle).await;
        }

        self.ws_sender = None;
        self.is_connected.store(false, Ordering::Release);

        info!("Disconnected from streaming synthesizer");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire) && self.ws_sender.is_some()
    }

    async fn synthesize(&mut self, text: &str, flush: bool) -> Result<(), TtsError> {
        let Some(ws_sender) = &self.ws_sender else {
            return Err(TtsError::NotConnected);
        };

        // New synthesis supersedes any cancelled work; audio flows again.
        self.sinks.cancelled.store(false, Ordering::Release);

        let frame = synthesize_frame(text, flush).to_string();
        ws_sender
            .send(frame)
            .await
            .map_err(|e| TtsError::Network(format!("Failed to queue synthesis frame: {e}")))?;

        debug!(flush, "Queued {} chars for synthesis", text.chars().count());
        Ok(())
    }

    fn cancel(&self) {
        // Order matters: raise the flag before the flush frame goes out
        // so no in-flight chunk slips through to the sinks.
        self.sinks.cancelled.store(true, Ordering::Release);

        if let Some(ws_sender) = &self.ws_sender {
            if ws_sender.try_send(cancel_frame().to_string()).is_err() {
                warn!("Could not queue synthesis cancel frame");
            }
        }
        debug!("Synthesis cancelled; connection stays open");
    }

    fn on_audio_chunk(&mut self, callback: AudioChunkCallback) -> Result<(), TtsError> {
        *self.sinks.audio.lock() = Some(callback);
        Ok(())
    }

    fn on_complete(&mut self, callback: CompleteCallback) -> Result<(), TtsError> {
        *self.sinks.complete.lock() = Some(callback);
        Ok(())
    }

    fn on_error(&mut self, callback: TtsErrorCallback) -> Result<(), TtsError> {
        *self.sinks.error.lock() = Some(callback);
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "elevenlabs",
            model: self.config.model.clone(),
            language: String::new(),
            typical_latency_ms: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> TtsConfig {
        TtsConfig {
            api_key: "xi-test".to_string(),
            voice_id: "voice-1".to_string(),
            ..Default::default()
        }
    }

    fn counting_sinks() -> (TtsSinks, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let audio_count = Arc::new(AtomicUsize::new(0));
        let complete_count = Arc::new(AtomicUsize::new(0));

        let sinks = TtsSinks {
            audio: Arc::new(Mutex::new(None)),
            complete: Arc::new(Mutex::new(None)),
            error: Arc::new(Mutex::new(None)),
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        let counter = audio_count.clone();
        *sinks.audio.lock() = Some(Arc::new(move |_bytes: Bytes| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        }));

        let counter = complete_count.clone();
        *sinks.complete.lock() = Some(Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        }));

        (sinks, audio_count, complete_count)
    }

    #[test]
    fn test_new_requires_credentials() {
        assert!(matches!(
            ElevenLabsTts::new(TtsConfig::default()),
            Err(TtsError::Configuration(_))
        ));

        let no_voice = TtsConfig {
            api_key: "xi-test".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ElevenLabsTts::new(no_voice),
            Err(TtsError::Configuration(_))
        ));
    }

    #[test]
    fn test_websocket_url() {
        let tts = ElevenLabsTts::new(test_config()).unwrap();
        let url = tts.build_websocket_url();
        assert_eq!(
            url,
            "wss://api.elevenlabs.io/v1/text-to-speech/voice-1/stream-input?model_id=eleven_flash_v2_5"
        );
    }

    #[tokio::test]
    async fn test_synthesize_when_not_connected() {
        let mut tts = ElevenLabsTts::new(test_config()).unwrap();
        let result = tts.synthesize("hola", true).await;
        assert!(matches!(result, Err(TtsError::NotConnected)));
    }

    #[test]
    fn test_cancel_when_idle_is_a_noop() {
        let tts = ElevenLabsTts::new(test_config()).unwrap();
        tts.cancel();
        assert!(tts.sinks.cancelled.load(Ordering::Acquire));
        assert!(!tts.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut tts = ElevenLabsTts::new(test_config()).unwrap();
        assert!(tts.disconnect().await.is_ok());
        assert!(tts.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_audio_delivery_and_completion() {
        let (sinks, audio_count, complete_count) = counting_sinks();

        let encoded = BASE64.encode([0u8; 32]);
        let raw = format!(r#"{{"audio": "{encoded}"}}"#);
        assert!(sinks.handle_message(Message::Text(raw.into())).await);
        assert!(sinks.handle_message(Message::Text(r#"{"isFinal": true}"#.into())).await);

        assert_eq!(audio_count.load(Ordering::SeqCst), 1);
        assert_eq!(complete_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_raw_binary_audio_delivery() {
        let (sinks, audio_count, _) = counting_sinks();
        let cont = sinks
            .handle_message(Message::Binary(Bytes::from_static(&[0u8; 16])))
            .await;
        assert!(cont);
        assert_eq!(audio_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_flag_drops_audio_until_cleared() {
        let (sinks, audio_count, complete_count) = counting_sinks();
        sinks.cancelled.store(true, Ordering::Release);

        let encoded = BASE64.encode([0u8; 32]);
        let raw = format!(r#"{{"audio": "{encoded}"}}"#);
        sinks.handle_message(Message::Text(raw.clone().into())).await;
        sinks
            .handle_message(Message::Text(r#"{"isFinal": true}"#.into()))
            .await;
        assert_eq!(audio_count.load(Ordering::SeqCst), 0);
        assert_eq!(complete_count.load(Ordering::SeqCst), 0);

        // The flag clears on the next synthesize; audio flows again.
        sinks.cancelled.store(false, Ordering::Release);
        sinks.handle_message(Message::Text(raw.into())).await;
        assert_eq!(audio_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_frame_stops_processing() {
        let (sinks, _, _) = counting_sinks();
        assert!(!sinks.handle_message(Message::Close(None)).await);
    }

    #[tokio::test]
    async fn test_connect_rejects_unreachable_endpoint() {
        let mut config = test_config();
        config.endpoint = "ws://127.0.0.1:1/v1/text-to-speech".to_string();
        let mut tts = ElevenLabsTts::new(config).unwrap();
        let result = tts.connect().await;
        assert!(matches!(
            result,
            Err(TtsError::ProviderUnavailable(_)) | Err(TtsError::Timeout(_))
        ));
    }
}
