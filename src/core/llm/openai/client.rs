//! Streaming chat-completions client.
//!
//! Each `stream_response` call issues one `stream: true` request and
//! spawns a parser task that walks the SSE byte stream line by line,
//! forwarding text deltas through a bounded channel. Cancellation is a
//! `CancellationToken` select inside the parser: an aborted request ends
//! the stream cleanly and is never surfaced as a failure.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::messages::{build_request_body, extract_delta};
use crate::core::llm::base::{
    BaseLlm, ChatTurn, LlmConfig, LlmError, LlmErrorCallback, LlmEvent, TokenStream,
};
use crate::core::llm::pricing;
use crate::core::ProviderInfo;

/// Time allowed for the upstream to accept the request and start streaming.
const REQUEST_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded fragment channel size.
const TOKEN_CHANNEL_SIZE: usize = 256;

type SharedErrorCallback = Arc<AsyncMutex<Option<LlmErrorCallback>>>;

/// OpenAI-compatible streaming LLM adapter.
pub struct OpenAiLlm {
    config: LlmConfig,
    http_client: reqwest::Client,
    /// Token for the in-flight request, if any. Replaced per call.
    cancel_token: Mutex<Option<CancellationToken>>,
    error_callback: SharedErrorCallback,
}

impl OpenAiLlm {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration(
                "API key is required for the LLM adapter".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(REQUEST_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
            cancel_token: Mutex::new(None),
            error_callback: Arc::new(AsyncMutex::new(None)),
        })
    }

    async fn deliver_error(error_callback: &SharedErrorCallback, err: LlmError) {
        if let Some(callback) = error_callback.lock().await.as_ref() {
            callback(err).await;
        } else {
            warn!("LLM error with no registered sink: {}", err);
        }
    }
}

/// Walk the SSE byte stream, forwarding deltas until `[DONE]`,
/// cancellation, or upstream failure.
async fn run_sse_stream(
    byte_stream: impl futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
    tx: mpsc::Sender<LlmEvent>,
    cancel: CancellationToken,
    error_callback: SharedErrorCallback,
) {
    let mut stream = Box::pin(byte_stream);
    let mut line_buffer = String::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("LLM stream cancelled, dropping remaining fragments");
                return;
            }

            item = stream.next() => {
                let bytes = match item {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => {
                        // A cancelled request surfaces as a transport error
                        // from reqwest; that is a clean end, not a failure.
                        if cancel.is_cancelled() {
                            return;
                        }
                        OpenAiLlm::deliver_error(
                            &error_callback,
                            LlmError::Network(format!("SSE stream error: {e}")),
                        )
                        .await;
                        return;
                    }
                    None => break,
                };

                line_buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline_pos) = line_buffer.find('\n') {
                    let line = line_buffer[..newline_pos].trim_end_matches('\r').to_string();
                    line_buffer.drain(..=newline_pos);

                    let Some(data) = line.strip_prefix("data: ") else { continue };

                    if data == "[DONE]" {
                        let _ = tx.send(LlmEvent::Done).await;
                        return;
                    }

                    match serde_json::from_str::<serde_json::Value>(data) {
                        Ok(chunk) => {
                            if let Some(delta) = extract_delta(&chunk) {
                                if tx.send(LlmEvent::Token(delta.to_string())).await.is_err() {
                                    // Consumer abandoned the stream.
                                    return;
                                }
                            }
                        }
                        Err(e) => debug!("Skipping unparseable SSE chunk: {}", e),
                    }
                }
            }
        }
    }

    // Stream ended without the [DONE] marker; treat what arrived as the
    // complete reply.
    let _ = tx.send(LlmEvent::Done).await;
}

#[async_trait::async_trait]
impl BaseLlm for OpenAiLlm {
    async fn stream_response(
        &mut self,
        history: &[ChatTurn],
        client_name: Option<&str>,
    ) -> Result<TokenStream, LlmError> {
        let body = build_request_body(&self.config, history, client_name);

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(format!("Chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(300).collect();
            return Err(match status.as_u16() {
                401 | 403 => LlmError::ProviderUnavailable(format!(
                    "Chat auth failed ({status}): {detail}"
                )),
                _ => LlmError::Api(format!("Chat request failed ({status}): {detail}")),
            });
        }

        let cancel = CancellationToken::new();
        *self.cancel_token.lock() = Some(cancel.clone());

        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_SIZE);
        let error_callback = self.error_callback.clone();
        tokio::spawn(async move {
            run_sse_stream(response.bytes_stream(), tx, cancel, error_callback).await;
        });

        Ok(TokenStream::new(rx))
    }

    fn cancel(&self) {
        if let Some(token) = self.cancel_token.lock().as_ref() {
            token.cancel();
        }
    }

    async fn on_error(&mut self, callback: LlmErrorCallback) -> Result<(), LlmError> {
        *self.error_callback.lock().await = Some(callback);
        Ok(())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "openai",
            model: self.config.model.clone(),
            language: String::new(),
            typical_latency_ms: 400,
        }
    }

    fn estimate_cost(&self, history: &[ChatTurn]) -> f64 {
        pricing::estimate_chat_cost(&self.config.model, history, self.config.max_tokens)
    }
}
