//! Per-connection session orchestrator.
//!
//! One orchestrator per client connection, wiring client socket ↔ STT ↔
//! LLM ↔ TTS. Providers publish their events onto a bounded channel; the
//! orchestrator's `run` loop is the single consumer and therefore the
//! session's mutual-exclusion discipline: `history`, state flags, the
//! pending reply, and the output-audio generation are only touched from
//! this loop.
//!
//! # Barge-in
//!
//! When client audio arrives while the agent is replying, the orchestrator
//! cancels TTS and LLM (both non-blocking), bumps the output generation,
//! drops all queued output, clears the pending-reply accumulator, and
//! resets the speaking flags — before the new audio is forwarded to STT.
//! The partially spoken assistant turn is dropped from history unless
//! configured otherwise.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{
    ClientFrame, ClientMessage, ClientRoute, ErrorKind, ServerEvent, ServerMessage,
};
use crate::config::ServerConfig;
use crate::core::audio::AudioBufferManager;
use crate::core::llm::{BaseLlm, LlmError, LlmEvent, TokenStream};
use crate::core::stt::{BaseStt, SttError, TranscriptResult};
use crate::core::tts::{BaseTts, TtsError};
use crate::errors::AppError;
use crate::session::{Session, SessionRegistry, TurnRole};

/// Bounded pipeline event channel size.
const PIPELINE_CHANNEL_SIZE: usize = 256;

/// Characters that close a sentence of streamed LLM output.
fn is_sentence_delimiter(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

/// The three provider adapters bound to one session.
pub struct ProviderSet {
    pub stt: Box<dyn BaseStt>,
    pub llm: Box<dyn BaseLlm>,
    pub tts: Box<dyn BaseTts>,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet").finish_non_exhaustive()
    }
}

/// Deferred provider construction; consumed on the `init` frame.
pub type ProviderFactory = Box<dyn FnOnce() -> Result<ProviderSet, AppError> + Send>;

/// Events published by the provider adapters into the orchestrator loop.
#[derive(Debug)]
pub enum PipelineEvent {
    Transcript(TranscriptResult),
    SttFailure(SttError),
    TtsAudio {
        bytes: Bytes,
        /// Output generation read when the chunk arrived from upstream;
        /// chunks from a pre-barge-in epoch are dropped at consumption.
        generation: u64,
    },
    TtsComplete {
        /// Same epoch tag as `TtsAudio`: a completion for a cancelled
        /// reply must not end the reply that superseded it.
        generation: u64,
    },
    TtsFailure(TtsError),
    LlmFailure(LlmError),
}

/// Orchestrator knobs lifted from the server configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Minimum binary-frame size treated as voiced input for barge-in.
    pub vad_threshold_bytes: usize,
    /// Append the partially spoken reply on barge-in instead of dropping it.
    pub keep_interrupted_replies: bool,
    /// Chunks retained per audio queue (sized to ~30 s of client frames).
    pub audio_queue_chunks: usize,
    pub enable_metrics: bool,
    pub debug_audio: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            vad_threshold_bytes: config.vad_threshold_bytes,
            keep_interrupted_replies: config.keep_interrupted_replies,
            audio_queue_chunks: (30_000 / config.audio_chunk_size_ms.max(1)) as usize,
            enable_metrics: config.enable_metrics,
            debug_audio: config.debug_audio,
        }
    }
}

/// Per-connection pipeline driver. See the module docs for the model.
pub struct VoiceOrchestrator {
    registry: Arc<SessionRegistry>,
    settings: OrchestratorSettings,
    factory: Option<ProviderFactory>,
    client_tx: mpsc::Sender<ClientRoute>,

    session: Option<Arc<Session>>,
    stt: Option<Box<dyn BaseStt>>,
    llm: Option<Box<dyn BaseLlm>>,
    tts: Option<Box<dyn BaseTts>>,
    buffers: Arc<AudioBufferManager>,

    /// Full text of the in-progress assistant reply, for history.
    pending_reply: String,
    /// Rolling accumulator for the current sentence.
    sentence_buf: String,
    /// A completed sentence held for one fragment: if more text follows
    /// it goes out as an intermediate unit (`flush=false`); if the
    /// stream ends first it is the final unit (`flush=true`).
    held_sentence: Option<String>,

    /// Set when the connection must end after the current event.
    closing: bool,
}

impl VoiceOrchestrator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        settings: OrchestratorSettings,
        factory: ProviderFactory,
        client_tx: mpsc::Sender<ClientRoute>,
    ) -> Self {
        let buffers = Arc::new(AudioBufferManager::new(settings.audio_queue_chunks));
        Self {
            registry,
            settings,
            factory: Some(factory),
            client_tx,
            session: None,
            stt: None,
            llm: None,
            tts: None,
            buffers,
            pending_reply: String::new(),
            sentence_buf: String::new(),
            held_sentence: None,
            closing: false,
        }
    }

    /// Session handle, once `init` has succeeded. Test hook.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.clone()
    }

    /// Drive the pipeline until the client disconnects, a fatal error
    /// occurs, or the registry signals teardown.
    pub async fn run(mut self, mut client_rx: mpsc::Receiver<ClientFrame>) {
        let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(PIPELINE_CHANNEL_SIZE);
        let mut llm_stream: Option<TokenStream> = None;
        let mut shutdown: Option<CancellationToken> = None;

        loop {
            tokio::select! {
                frame = client_rx.recv() => {
                    match frame {
                        Some(ClientFrame::Text(text)) => {
                            if let Some(token) = self.handle_client_text(&text, &event_tx).await {
                                shutdown = Some(token);
                            }
                        }
                        Some(ClientFrame::Binary(bytes)) => {
                            self.handle_client_audio(bytes, &mut llm_stream).await;
                        }
                        None => {
                            info!("Client socket closed");
                            break;
                        }
                    }
                }

                Some(event) = event_rx.recv() => {
                    self.handle_pipeline_event(event, &mut llm_stream).await;
                }

                event = next_llm_event(&mut llm_stream), if llm_stream.is_some() => {
                    match event {
                        Some(LlmEvent::Token(token)) => self.handle_llm_token(token).await,
                        Some(LlmEvent::Done) => {
                            llm_stream = None;
                            self.complete_reply().await;
                        }
                        None => {
                            // Cancelled or failed upstream; the failure,
                            // if any, arrives through the error sink.
                            llm_stream = None;
                            self.abort_reply();
                        }
                    }
                }

                _ = wait_shutdown(&shutdown), if shutdown.is_some() => {
                    info!("Session teardown signalled by registry");
                    break;
                }
            }

            if self.closing {
                break;
            }
        }

        self.teardown().await;
    }

    // =========================================================================
    // Client frames
    // =========================================================================

    async fn handle_client_text(
        &mut self,
        raw: &str,
        event_tx: &mpsc::Sender<PipelineEvent>,
    ) -> Option<CancellationToken> {
        let message: ClientMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                self.send_error(
                    ErrorKind::MessageProcessingError,
                    format!("Malformed client frame: {e}"),
                )
                .await;
                return None;
            }
        };

        match message {
            ClientMessage::Init { metadata } => {
                if self.session.is_some() {
                    self.send_error(
                        ErrorKind::MessageProcessingError,
                        "Session already initialized",
                    )
                    .await;
                    return None;
                }
                match self.init_session(metadata, event_tx).await {
                    Ok(token) => Some(token),
                    Err(e) => {
                        error!("Session init failed: {e}");
                        self.send_error(ErrorKind::InitError, e.to_string()).await;
                        self.closing = true;
                        None
                    }
                }
            }
            ClientMessage::Metadata { metadata } => {
                match &self.session {
                    Some(session) => {
                        session.update_metadata(metadata);
                        session.touch();
                    }
                    None => {
                        self.send_error(
                            ErrorKind::MessageProcessingError,
                            "Received metadata before init",
                        )
                        .await;
                    }
                }
                None
            }
        }
    }

    /// Build providers, wire their sinks into the pipeline channel,
    /// connect STT and TTS in parallel, and announce readiness.
    async fn init_session(
        &mut self,
        metadata: std::collections::HashMap<String, String>,
        event_tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<CancellationToken, AppError> {
        let factory = self.factory.take().ok_or_else(|| {
            AppError::Configuration("provider factory already consumed".to_string())
        })?;
        let ProviderSet { mut stt, mut llm, mut tts } = factory()?;

        // Sinks before connects: nothing an adapter emits may be lost.
        let tx = event_tx.clone();
        stt.on_transcript(Arc::new(move |result| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PipelineEvent::Transcript(result)).await;
            })
        }))
        .await?;

        let tx = event_tx.clone();
        stt.on_error(Arc::new(move |err| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PipelineEvent::SttFailure(err)).await;
            })
        }))
        .await?;

        let tx = event_tx.clone();
        llm.on_error(Arc::new(move |err| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PipelineEvent::LlmFailure(err)).await;
            })
        }))
        .await?;

        let tx = event_tx.clone();
        let buffers = self.buffers.clone();
        tts.on_audio_chunk(Arc::new(move |bytes| {
            let tx = tx.clone();
            // Tag with the epoch at arrival time; the consumer drops
            // chunks whose epoch predates a barge-in.
            let generation = buffers.current_generation();
            Box::pin(async move {
                let _ = tx.send(PipelineEvent::TtsAudio { bytes, generation }).await;
            })
        }))?;

        let tx = event_tx.clone();
        let buffers = self.buffers.clone();
        tts.on_complete(Arc::new(move || {
            let tx = tx.clone();
            let generation = buffers.current_generation();
            Box::pin(async move {
                let _ = tx.send(PipelineEvent::TtsComplete { generation }).await;
            })
        }))?;

        let tx = event_tx.clone();
        tts.on_error(Arc::new(move |err| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PipelineEvent::TtsFailure(err)).await;
            })
        }))?;

        let (stt_result, tts_result) = tokio::join!(stt.connect(), tts.connect());
        stt_result?;
        tts_result?;

        let session = self.registry.create_session(metadata);
        session.flags.set_stt_connected(true);
        session.flags.set_tts_connected(true);

        let ready = ServerMessage::event(
            ServerEvent::Ready,
            json!({
                "sessionId": session.id,
                "providers": {
                    "stt": stt.info().summary(),
                    "llm": llm.info().summary(),
                    "tts": tts.info().summary(),
                },
            }),
        );

        let token = session.shutdown.clone();
        info!(session_id = %session.id, "Session ready");

        self.session = Some(session);
        self.stt = Some(stt);
        self.llm = Some(llm);
        self.tts = Some(tts);
        self.send(ready).await;

        Ok(token)
    }

    async fn handle_client_audio(
        &mut self,
        bytes: Bytes,
        llm_stream: &mut Option<TokenStream>,
    ) {
        let Some(session) = self.session.clone() else {
            debug!("Dropping audio frame received before init");
            return;
        };
        session.touch();
        self.buffers.push_inbound(bytes.clone());
        if self.settings.debug_audio {
            debug!(len = bytes.len(), "Inbound audio frame");
        }

        // A voiced frame while the agent is replying is a barge-in; the
        // cancellation runs BEFORE the audio reaches STT so the new
        // utterance starts a clean turn.
        let replying =
            session.flags.is_agent_speaking() || session.flags.is_llm_streaming();
        if replying && bytes.len() >= self.settings.vad_threshold_bytes {
            self.barge_in(&session, llm_stream).await;
        }

        if let Some(stt) = self.stt.as_mut() {
            if let Err(e) = stt.send_audio(bytes).await {
                self.send_error(
                    ErrorKind::AudioProcessingError,
                    format!("Could not forward audio: {e}"),
                )
                .await;
            }
        }
    }

    // =========================================================================
    // Barge-in
    // =========================================================================

    /// Cancel the in-flight reply without emitting the interruption event.
    async fn cancel_active_reply(
        &mut self,
        session: &Arc<Session>,
        llm_stream: &mut Option<TokenStream>,
    ) {
        if let Some(tts) = self.tts.as_ref() {
            tts.cancel();
        }
        if let Some(llm) = self.llm.as_ref() {
            llm.cancel();
        }
        *llm_stream = None;

        self.buffers.bump_generation();

        let interrupted = std::mem::take(&mut self.pending_reply);
        self.sentence_buf.clear();
        self.held_sentence = None;
        if self.settings.keep_interrupted_replies && !interrupted.trim().is_empty() {
            // What was actually spoken, kept on request.
            session.append_turn(TurnRole::Assistant, interrupted);
        }

        session.flags.set_agent_speaking(false);
        session.flags.set_llm_streaming(false);
        session.flags.set_tts_streaming(false);
    }

    async fn barge_in(&mut self, session: &Arc<Session>, llm_stream: &mut Option<TokenStream>) {
        info!(session_id = %session.id, "Barge-in: cancelling in-flight reply");
        self.cancel_active_reply(session, llm_stream).await;
        self.send(ServerMessage::event(
            ServerEvent::InterruptionProcessed,
            json!({}),
        ))
        .await;
    }

    // =========================================================================
    // Pipeline events
    // =========================================================================

    async fn handle_pipeline_event(
        &mut self,
        event: PipelineEvent,
        llm_stream: &mut Option<TokenStream>,
    ) {
        match event {
            PipelineEvent::Transcript(result) => {
                self.handle_transcript(result, llm_stream).await;
            }

            PipelineEvent::SttFailure(err) => {
                let fatal = err.is_fatal();
                self.send_error(ErrorKind::SttError, err.to_string()).await;
                if fatal {
                    // No mid-session reconnect: close and let the client
                    // re-establish.
                    warn!("Fatal STT failure, closing session");
                    self.closing = true;
                } else if let Some(session) = &self.session {
                    // Recoverable: back to IDLE, the next transcript may
                    // retry.
                    session.flags.set_llm_streaming(false);
                    session.flags.set_tts_streaming(false);
                    session.flags.set_agent_speaking(false);
                }
            }

            PipelineEvent::TtsAudio { bytes, generation } => {
                if generation != self.buffers.current_generation() {
                    debug!(generation, "Dropping audio chunk from stale reply epoch");
                    return;
                }
                self.buffers.push_outbound(bytes);
                while let Some(chunk) = self.buffers.pop_outbound() {
                    if self
                        .client_tx
                        .send(ClientRoute::Audio(chunk.bytes))
                        .await
                        .is_err()
                    {
                        self.closing = true;
                        return;
                    }
                }
            }

            PipelineEvent::TtsComplete { generation } => {
                if generation != self.buffers.current_generation() {
                    debug!(generation, "Dropping completion from stale reply epoch");
                    return;
                }
                let Some(session) = self.session.clone() else { return };
                // A completion arriving while the LLM is still streaming
                // belongs to an intermediate sentence; the reply is not
                // finished.
                if session.flags.is_agent_speaking() && !session.flags.is_llm_streaming() {
                    session.flags.set_agent_speaking(false);
                    session.flags.set_tts_streaming(false);
                    self.send(ServerMessage::event(
                        ServerEvent::AgentFinishedSpeaking,
                        json!({}),
                    ))
                    .await;
                }
            }

            PipelineEvent::TtsFailure(err) => {
                self.send_error(ErrorKind::TtsError, err.to_string()).await;
                if let Some(session) = &self.session {
                    session.flags.set_tts_streaming(false);
                    session.flags.set_agent_speaking(false);
                }
            }

            PipelineEvent::LlmFailure(err) => {
                self.send_error(ErrorKind::LlmError, err.to_string()).await;
                // Audio already synthesized keeps playing; only the
                // generation side is reset. No assistant turn is stored.
                if let Some(session) = &self.session {
                    session.flags.set_llm_streaming(false);
                }
                *llm_stream = None;
                self.pending_reply.clear();
                self.sentence_buf.clear();
                self.held_sentence = None;
            }
        }
    }

    async fn handle_transcript(
        &mut self,
        result: TranscriptResult,
        llm_stream: &mut Option<TokenStream>,
    ) {
        let Some(session) = self.session.clone() else { return };
        session.touch();

        if !result.is_final {
            self.send(ServerMessage::event(
                ServerEvent::TranscriptPartial,
                json!({"text": result.text, "confidence": result.confidence}),
            ))
            .await;
            return;
        }

        self.send(ServerMessage::event(
            ServerEvent::TranscriptFinal,
            json!({"text": result.text, "confidence": result.confidence}),
        ))
        .await;

        self.start_reply(&session, result.text, llm_stream).await;
    }

    // =========================================================================
    // Reply procedure
    // =========================================================================

    async fn start_reply(
        &mut self,
        session: &Arc<Session>,
        text: String,
        llm_stream: &mut Option<TokenStream>,
    ) {
        // A final transcript landing while a reply is still in flight
        // supersedes it; cancel silently before starting the new turn.
        if llm_stream.is_some() || session.flags.is_llm_streaming() {
            self.cancel_active_reply(session, llm_stream).await;
        }

        session.append_turn(TurnRole::User, text);
        let history = session.formatted_history();
        let client_name = session.client_name();

        let Some(llm) = self.llm.as_mut() else { return };
        match llm.stream_response(&history, client_name.as_deref()).await {
            Ok(stream) => {
                *llm_stream = Some(stream);
                session.flags.set_llm_streaming(true);
                self.pending_reply.clear();
                self.sentence_buf.clear();
                self.held_sentence = None;
            }
            Err(e) => {
                self.send_error(ErrorKind::LlmError, e.to_string()).await;
            }
        }
    }

    async fn handle_llm_token(&mut self, token: String) {
        let Some(session) = self.session.clone() else { return };

        // More text followed the held sentence: it was intermediate.
        if let Some(held) = self.held_sentence.take() {
            self.submit_to_tts(&session, &held, false).await;
        }

        self.sentence_buf.push_str(&token);
        self.pending_reply.push_str(&token);

        self.send(ServerMessage::event(
            ServerEvent::LlmChunk,
            json!({"chunk": token}),
        ))
        .await;

        if token.chars().last().is_some_and(is_sentence_delimiter) {
            let sentence = std::mem::take(&mut self.sentence_buf);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                self.held_sentence = Some(sentence.to_string());
            }
        }
    }

    /// Submit one semantic unit to TTS and mark the agent speaking.
    async fn submit_to_tts(&mut self, session: &Arc<Session>, text: &str, flush: bool) {
        let Some(tts) = self.tts.as_mut() else { return };
        match tts.synthesize(text, flush).await {
            Ok(()) => {
                session.flags.set_tts_streaming(true);
                session.flags.set_agent_speaking(true);
            }
            Err(e) => {
                self.send_error(ErrorKind::SynthesisError, e.to_string()).await;
            }
        }
    }

    /// LLM stream finished normally: flush the held sentence and any
    /// residual text (the last unit with `flush=true`), store the
    /// assistant turn, leave the speaking state to TTS completion.
    async fn complete_reply(&mut self) {
        let Some(session) = self.session.clone() else { return };

        let held = self.held_sentence.take();
        let residual = std::mem::take(&mut self.sentence_buf);
        let residual = residual.trim().to_string();
        match (held, residual.is_empty()) {
            (Some(held), false) => {
                self.submit_to_tts(&session, &held, false).await;
                self.submit_to_tts(&session, &residual, true).await;
            }
            (Some(held), true) => self.submit_to_tts(&session, &held, true).await,
            (None, false) => self.submit_to_tts(&session, &residual, true).await,
            (None, true) => {}
        }

        let reply = std::mem::take(&mut self.pending_reply);
        if !reply.is_empty() {
            session.append_turn(TurnRole::Assistant, reply);
        }
        session.flags.set_llm_streaming(false);

        if self.settings.enable_metrics {
            if let Some(llm) = self.llm.as_ref() {
                let cost = llm.estimate_cost(&session.formatted_history());
                info!(
                    session_id = %session.id,
                    estimated_cost_usd = format!("{cost:.5}"),
                    "Reply complete"
                );
            }
        }
    }

    /// LLM stream ended without a completion marker (cancelled or failed).
    /// The interrupted turn never reaches history.
    fn abort_reply(&mut self) {
        if let Some(session) = &self.session {
            session.flags.set_llm_streaming(false);
        }
        self.pending_reply.clear();
        self.sentence_buf.clear();
        self.held_sentence = None;
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    async fn teardown(&mut self) {
        if let Some(llm) = self.llm.as_ref() {
            llm.cancel();
        }
        if let Some(tts) = self.tts.as_ref() {
            tts.cancel();
        }

        if let Some(mut stt) = self.stt.take() {
            if let Err(e) = stt.disconnect().await {
                warn!("STT disconnect during teardown failed: {e}");
            }
        }
        if let Some(mut tts) = self.tts.take() {
            if let Err(e) = tts.disconnect().await {
                warn!("TTS disconnect during teardown failed: {e}");
            }
        }
        self.llm = None;
        self.buffers.clear();

        if let Some(session) = self.session.take() {
            session.flags.set_active(false);
            self.registry.remove(&session.id);
            info!(session_id = %session.id, "Session torn down");
        }

        let _ = self.client_tx.send(ClientRoute::Close).await;
    }

    // =========================================================================
    // Client sink helpers
    // =========================================================================

    async fn send(&mut self, message: ServerMessage) {
        if self
            .client_tx
            .send(ClientRoute::Message(message))
            .await
            .is_err()
        {
            self.closing = true;
        }
    }

    async fn send_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        warn!(error = ?kind, "{message}");
        self.send(ServerMessage::error(kind, message)).await;
    }
}

async fn next_llm_event(stream: &mut Option<TokenStream>) -> Option<LlmEvent> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_shutdown(token: &Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
