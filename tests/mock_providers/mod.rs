//! In-process mock providers implementing the real trait contracts.
//!
//! Tests hold `Arc` handles to each mock's state, inject scripted
//! behavior, and observe what the orchestrator did — no network anywhere.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use voxgate::core::llm::{
    BaseLlm, ChatTurn, LlmError, LlmErrorCallback, LlmEvent, TokenStream,
};
use voxgate::core::stt::{
    is_suppressed_transcript, BaseStt, SttError, SttErrorCallback, TranscriptCallback,
    TranscriptResult,
};
use voxgate::core::tts::{
    AudioChunkCallback, BaseTts, CompleteCallback, TtsError, TtsErrorCallback,
};
use voxgate::core::ProviderInfo;

// =============================================================================
// Mock STT
// =============================================================================

#[derive(Default)]
pub struct MockSttState {
    pub junk_phrases: Vec<String>,
    pub connected: AtomicBool,
    pub connect_calls: AtomicUsize,
    pub connect_failure: Mutex<Option<SttError>>,
    pub received_audio: Mutex<Vec<Bytes>>,
    transcript_callback: AsyncMutex<Option<TranscriptCallback>>,
    error_callback: AsyncMutex<Option<SttErrorCallback>>,
}

impl MockSttState {
    pub fn with_junk(junk_phrases: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            junk_phrases,
            ..Default::default()
        })
    }

    /// Emit a transcript exactly like the real adapters would: silence
    /// and junk phrases are coerced into no event at all.
    pub async fn emit(&self, text: &str, is_final: bool, confidence: f32) {
        if is_suppressed_transcript(text, &self.junk_phrases) {
            return;
        }
        if let Some(callback) = self.transcript_callback.lock().await.as_ref() {
            callback(TranscriptResult::new(text, is_final, confidence)).await;
        }
    }

    pub async fn emit_final(&self, text: &str) {
        self.emit(text, true, 0.97).await;
    }

    pub async fn emit_partial(&self, text: &str) {
        self.emit(text, false, 0.6).await;
    }

    pub async fn emit_error(&self, err: SttError) {
        if let Some(callback) = self.error_callback.lock().await.as_ref() {
            callback(err).await;
        }
    }

    pub fn received_frames(&self) -> usize {
        self.received_audio.lock().len()
    }
}

pub struct MockStt {
    pub state: Arc<MockSttState>,
}

#[async_trait]
impl BaseStt for MockStt {
    async fn connect(&mut self) -> Result<(), SttError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.connect_failure.lock().take() {
            return Err(err);
        }
        if self.state.connected.load(Ordering::SeqCst) {
            return Err(SttError::AlreadyConnected);
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SttError> {
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn send_audio(&mut self, audio: Bytes) -> Result<(), SttError> {
        if !self.is_connected() {
            return Err(SttError::NotConnected);
        }
        self.state.received_audio.lock().push(audio);
        Ok(())
    }

    async fn on_transcript(&mut self, callback: TranscriptCallback) -> Result<(), SttError> {
        *self.state.transcript_callback.lock().await = Some(callback);
        Ok(())
    }

    async fn on_error(&mut self, callback: SttErrorCallback) -> Result<(), SttError> {
        *self.state.error_callback.lock().await = Some(callback);
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "mock-stt",
            model: "test".to_string(),
            language: "es".to_string(),
            typical_latency_ms: 1,
        }
    }
}

// =============================================================================
// Mock LLM
// =============================================================================

#[derive(Default)]
pub struct MockLlmState {
    /// Pre-scripted streams handed out per `stream_response` call.
    pub streams: Mutex<VecDeque<mpsc::Receiver<LlmEvent>>>,
    pub cancel_calls: AtomicUsize,
    /// `(history, client_name)` per call.
    pub calls: Mutex<Vec<(Vec<ChatTurn>, Option<String>)>>,
    error_callback: AsyncMutex<Option<LlmErrorCallback>>,
}

impl MockLlmState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a reply that is delivered in full as soon as it is consumed.
    pub fn script_reply(&self, fragments: &[&str]) {
        let (tx, rx) = mpsc::channel(64);
        for fragment in fragments {
            tx.try_send(LlmEvent::Token(fragment.to_string())).unwrap();
        }
        tx.try_send(LlmEvent::Done).unwrap();
        self.streams.lock().push_back(rx);
    }

    /// Queue a stream the test feeds by hand; the sender is returned.
    pub fn script_held_stream(&self) -> mpsc::Sender<LlmEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.streams.lock().push_back(rx);
        tx
    }

    pub async fn emit_error(&self, err: LlmError) {
        if let Some(callback) = self.error_callback.lock().await.as_ref() {
            callback(err).await;
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

pub struct MockLlm {
    pub state: Arc<MockLlmState>,
}

#[async_trait]
impl BaseLlm for MockLlm {
    async fn stream_response(
        &mut self,
        history: &[ChatTurn],
        client_name: Option<&str>,
    ) -> Result<TokenStream, LlmError> {
        self.state
            .calls
            .lock()
            .push((history.to_vec(), client_name.map(String::from)));
        let rx = self
            .state
            .streams
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Api("no scripted reply".to_string()))?;
        Ok(TokenStream::new(rx))
    }

    fn cancel(&self) {
        self.state.cancel_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_error(&mut self, callback: LlmErrorCallback) -> Result<(), LlmError> {
        *self.state.error_callback.lock().await = Some(callback);
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "mock-llm",
            model: "test".to_string(),
            language: String::new(),
            typical_latency_ms: 1,
        }
    }

    fn estimate_cost(&self, _history: &[ChatTurn]) -> f64 {
        0.001
    }
}

// =============================================================================
// Mock TTS
// =============================================================================

#[derive(Default)]
pub struct MockTtsState {
    pub connected: AtomicBool,
    /// Mirrors the real adapter's cancelled flag: audio emitted while
    /// set is dropped, the next synthesize clears it.
    pub cancelled: AtomicBool,
    pub cancel_calls: AtomicUsize,
    /// `(text, flush)` per synthesize call.
    pub synthesized: Mutex<Vec<(String, bool)>>,
    audio_callback: Mutex<Option<AudioChunkCallback>>,
    complete_callback: Mutex<Option<CompleteCallback>>,
    error_callback: Mutex<Option<TtsErrorCallback>>,
}

impl MockTtsState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver one audio chunk the way the real adapter does: dropped
    /// while the cancelled flag is raised.
    pub async fn emit_audio(&self, bytes: Bytes) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let callback = self.audio_callback.lock().clone();
        if let Some(callback) = callback {
            callback(bytes).await;
        }
    }

    pub async fn emit_complete(&self) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let callback = self.complete_callback.lock().clone();
        if let Some(callback) = callback {
            callback().await;
        }
    }

    pub async fn emit_error(&self, err: TtsError) {
        let callback = self.error_callback.lock().clone();
        if let Some(callback) = callback {
            callback(err).await;
        }
    }

    pub fn synthesize_log(&self) -> Vec<(String, bool)> {
        self.synthesized.lock().clone()
    }
}

pub struct MockTts {
    pub state: Arc<MockTtsState>,
}

#[async_trait]
impl BaseTts for MockTts {
    async fn connect(&mut self) -> Result<(), TtsError> {
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TtsError> {
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn synthesize(&mut self, text: &str, flush: bool) -> Result<(), TtsError> {
        if !self.is_connected() {
            return Err(TtsError::NotConnected);
        }
        self.state.cancelled.store(false, Ordering::SeqCst);
        self.state
            .synthesized
            .lock()
            .push((text.to_string(), flush));
        Ok(())
    }

    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.cancel_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn on_audio_chunk(&mut self, callback: AudioChunkCallback) -> Result<(), TtsError> {
        *self.state.audio_callback.lock() = Some(callback);
        Ok(())
    }

    fn on_complete(&mut self, callback: CompleteCallback) -> Result<(), TtsError> {
        *self.state.complete_callback.lock() = Some(callback);
        Ok(())
    }

    fn on_error(&mut self, callback: TtsErrorCallback) -> Result<(), TtsError> {
        *self.state.error_callback.lock() = Some(callback);
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "mock-tts",
            model: "test".to_string(),
            language: String::new(),
            typical_latency_ms: 1,
        }
    }
}
