//! Buffered Whisper STT client implementation.
//!
//! Whisper exposes a one-shot REST API, not a streaming socket. This
//! adapter keeps the streaming contract by buffering:
//!
//! 1. A client frame at or above the minimum utterance size is treated
//!    as a self-contained utterance file and submitted immediately.
//! 2. Undersized frames accumulate in memory.
//! 3. A periodic sweep (every 2 s) concatenates and submits the
//!    accumulator once it crosses the threshold.
//!
//! There are no interim transcripts in this mode; results surface as
//! `is_final = true` with full confidence. Empty text and configured
//! junk phrases are coerced into no event at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::WhisperSttConfig;
use super::messages::{error_message, to_transcript, TranscriptionResponse};
use crate::core::stt::base::{
    BaseStt, SttConfig, SttError, SttErrorCallback, TranscriptCallback,
};
use crate::core::ProviderInfo;

/// Request timeout for one-shot transcription calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for the pooled HTTP client.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared between the adapter handle, spawned submissions, and the
/// sweep task.
struct WhisperShared {
    config: WhisperSttConfig,
    http_client: reqwest::Client,
    /// Accumulator for undersized audio chunks.
    buffer: Mutex<Vec<u8>>,
    transcript_callback: Mutex<Option<TranscriptCallback>>,
    error_callback: Mutex<Option<SttErrorCallback>>,
    connected: AtomicBool,
}

impl WhisperShared {
    async fn deliver_transcript(&self, text: &str) {
        match to_transcript(text, &self.config.base.junk_phrases) {
            Some(result) => {
                if let Some(callback) = self.transcript_callback.lock().await.as_ref() {
                    callback(result).await;
                } else {
                    debug!("Transcript with no registered sink: {:?}", text);
                }
            }
            None => debug!("Suppressed recognizer output: {:?}", text),
        }
    }

    async fn deliver_error(&self, err: SttError) {
        if let Some(callback) = self.error_callback.lock().await.as_ref() {
            callback(err).await;
        } else {
            warn!("Recognizer error with no registered sink: {}", err);
        }
    }
}

/// Submit one utterance file and deliver the result through the sinks.
async fn transcribe(shared: Arc<WhisperShared>, audio: Vec<u8>) {
    let audio_len = audio.len();
    let part = match Part::bytes(audio)
        .file_name("utterance.webm")
        .mime_str("audio/webm")
    {
        Ok(part) => part,
        Err(e) => {
            shared
                .deliver_error(SttError::Configuration(format!(
                    "Failed to build upload part: {e}"
                )))
                .await;
            return;
        }
    };

    let form = Form::new()
        .part("file", part)
        .text("model", shared.config.base.model.clone())
        .text("language", shared.config.base.language.clone())
        .text("response_format", "json");

    debug!("Submitting {} bytes for one-shot transcription", audio_len);

    let response = shared
        .http_client
        .post(&shared.config.endpoint)
        .bearer_auth(&shared.config.base.api_key)
        .multipart(form)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            shared
                .deliver_error(SttError::Network(format!("Transcription request failed: {e}")))
                .await;
            return;
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        let detail = error_message(&body);
        let err = match status.as_u16() {
            401 | 403 => SttError::ProviderUnavailable(format!(
                "Transcription auth failed ({status}): {detail}"
            )),
            _ => SttError::Provider(format!("Transcription failed ({status}): {detail}")),
        };
        shared.deliver_error(err).await;
        return;
    }

    match serde_json::from_str::<TranscriptionResponse>(&body) {
        Ok(parsed) => shared.deliver_transcript(&parsed.text).await,
        Err(e) => {
            shared
                .deliver_error(SttError::Provider(format!(
                    "Unparseable transcription response: {e}"
                )))
                .await;
        }
    }
}

/// Drain the accumulator and submit it when it has crossed the threshold.
async fn sweep_accumulator(shared: &Arc<WhisperShared>) {
    let pending = {
        let mut buffer = shared.buffer.lock().await;
        if buffer.len() >= shared.config.min_utterance_bytes {
            Some(std::mem::take(&mut *buffer))
        } else {
            None
        }
    };

    if let Some(audio) = pending {
        debug!("Sweep submitting {} accumulated bytes", audio.len());
        transcribe(shared.clone(), audio).await;
    }
}

/// Buffered Whisper STT client implementing the [`BaseStt`] trait.
pub struct WhisperStt {
    shared: Arc<WhisperShared>,
    sweep_handle: Option<tokio::task::JoinHandle<()>>,
}

impl WhisperStt {
    /// Create a new client. Fails fast on missing credentials.
    pub fn new(config: SttConfig) -> Result<Self, SttError> {
        Self::with_config(WhisperSttConfig::from_base(config))
    }

    /// Create a client with full Whisper-specific configuration.
    pub fn with_config(config: WhisperSttConfig) -> Result<Self, SttError> {
        config.validate().map_err(SttError::Configuration)?;

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| SttError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            shared: Arc::new(WhisperShared {
                config,
                http_client,
                buffer: Mutex::new(Vec::new()),
                transcript_callback: Mutex::new(None),
                error_callback: Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
            sweep_handle: None,
        })
    }

    /// Bytes currently sitting in the accumulator. Test hook.
    #[cfg(test)]
    async fn buffered_len(&self) -> usize {
        self.shared.buffer.lock().await.len()
    }
}

impl Drop for WhisperStt {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait::async_trait]
impl BaseStt for WhisperStt {
    async fn connect(&mut self) -> Result<(), SttError> {
        if self.is_connected() {
            return Err(SttError::AlreadyConnected);
        }

        self.shared.connected.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let interval = self.shared.config.sweep_interval;
        self.sweep_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                if !shared.connected.load(Ordering::Acquire) {
                    break;
                }
                sweep_accumulator(&shared).await;
            }
        }));

        info!("Buffered recognizer ready (sweep every {:?})", interval);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SttError> {
        self.shared.connected.store(false, Ordering::Release);

        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
        }

        // Flush in-flight accumulation that is large enough to recognize;
        // anything smaller is too short and is discarded.
        let pending = {
            let mut buffer = self.shared.buffer.lock().await;
            let drained = std::mem::take(&mut *buffer);
            (drained.len() >= self.shared.config.min_utterance_bytes).then_some(drained)
        };
        if let Some(audio) = pending {
            transcribe(self.shared.clone(), audio).await;
        }

        info!("Disconnected buffered recognizer");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn send_audio(&mut self, audio: Bytes) -> Result<(), SttError> {
        if !self.is_connected() {
            return Err(SttError::NotConnected);
        }

        if audio.len() >= self.shared.config.min_utterance_bytes {
            // Self-contained utterance: submit off the caller's path so
            // this stays callable at frame cadence.
            let shared = self.shared.clone();
            let chunk = audio.to_vec();
            tokio::spawn(async move {
                transcribe(shared, chunk).await;
            });
            return Ok(());
        }

        let mut buffer = self.shared.buffer.lock().await;
        if buffer.len() + audio.len() > self.shared.config.max_buffer_bytes {
            warn!(
                "Audio accumulator exceeded {} bytes, discarding stale data",
                self.shared.config.max_buffer_bytes
            );
            buffer.clear();
        }
        buffer.extend_from_slice(&audio);
        Ok(())
    }

    async fn on_transcript(&mut self, callback: TranscriptCallback) -> Result<(), SttError> {
        *self.shared.transcript_callback.lock().await = Some(callback);
        Ok(())
    }

    async fn on_error(&mut self, callback: SttErrorCallback) -> Result<(), SttError> {
        *self.shared.error_callback.lock().await = Some(callback);
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "whisper",
            model: self.shared.config.base.model.clone(),
            language: self.shared.config.base.language.clone(),
            typical_latency_ms: 900,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> SttConfig {
        SttConfig {
            api_key: "sk-test".to_string(),
            model: "whisper-1".to_string(),
            language: "es".to_string(),
            junk_phrases: Vec::new(),
        }
    }

    #[test]
    fn test_new_requires_api_key() {
        let result = WhisperStt::new(SttConfig::default());
        assert!(matches!(result, Err(SttError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_send_audio_requires_connect() {
        let mut stt = WhisperStt::new(test_config()).unwrap();
        let result = stt.send_audio(Bytes::from_static(&[0u8; 16])).await;
        assert!(matches!(result, Err(SttError::NotConnected)));
    }

    #[tokio::test]
    async fn test_double_connect_is_an_error() {
        let mut stt = WhisperStt::new(test_config()).unwrap();
        stt.connect().await.unwrap();
        assert!(matches!(stt.connect().await, Err(SttError::AlreadyConnected)));
        stt.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_disconnect_round_trip() {
        let mut stt = WhisperStt::new(test_config()).unwrap();
        stt.connect().await.unwrap();
        assert!(stt.is_connected());
        stt.disconnect().await.unwrap();
        assert!(!stt.is_connected());
        stt.connect().await.unwrap();
        assert!(stt.is_connected());
        stt.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_undersized_chunks_accumulate() {
        let mut stt = WhisperStt::new(test_config()).unwrap();
        stt.connect().await.unwrap();

        stt.send_audio(Bytes::from(vec![0u8; 1024])).await.unwrap();
        stt.send_audio(Bytes::from(vec![0u8; 2048])).await.unwrap();
        assert_eq!(stt.buffered_len().await, 3072);

        stt.disconnect().await.unwrap();
        // Under-threshold accumulation is discarded on disconnect.
        assert_eq!(stt.buffered_len().await, 0);
    }

    #[tokio::test]
    async fn test_accumulator_cap_discards_stale_data() {
        let mut config = WhisperSttConfig::from_base(test_config());
        config.min_utterance_bytes = 8 * 1024;
        config.max_buffer_bytes = 10 * 1024;
        let mut stt = WhisperStt::with_config(config).unwrap();
        stt.connect().await.unwrap();

        stt.send_audio(Bytes::from(vec![0u8; 6 * 1024])).await.unwrap();
        stt.send_audio(Bytes::from(vec![0u8; 6 * 1024])).await.unwrap();
        // Second push would exceed the cap: the stale 6 KiB is discarded first.
        assert_eq!(stt.buffered_len().await, 6 * 1024);

        stt.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_submits_accumulated_audio_and_surfaces_errors() {
        // Point at a closed port: the sweep must fire and the failure must
        // arrive through the error sink, not as a panic or silent drop.
        let mut config = WhisperSttConfig::from_base(test_config());
        config.endpoint = "http://127.0.0.1:1/transcriptions".to_string();
        config.min_utterance_bytes = 512;
        config.sweep_interval = Duration::from_millis(50);

        let mut stt = WhisperStt::with_config(config).unwrap();

        let errors = Arc::new(AtomicUsize::new(0));
        let errors_ref = errors.clone();
        stt.on_error(Arc::new(move |_err| {
            let errors = errors_ref.clone();
            Box::pin(async move {
                errors.fetch_add(1, Ordering::SeqCst);
            })
        }))
        .await
        .unwrap();

        stt.connect().await.unwrap();
        // Two undersized chunks that only cross the threshold combined:
        // only the sweep can submit them.
        stt.send_audio(Bytes::from(vec![0u8; 300])).await.unwrap();
        stt.send_audio(Bytes::from(vec![0u8; 300])).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while errors.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("sweep should submit and surface a network error");

        stt.disconnect().await.unwrap();
    }

    #[test]
    fn test_info() {
        let stt = WhisperStt::new(test_config()).unwrap();
        let info = stt.info();
        assert_eq!(info.name, "whisper");
        assert_eq!(info.model, "whisper-1");
    }
}
