//! Base trait and shared types for token-streaming LLM adapters.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::ProviderInfo;

/// A single conversation turn, as handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Errors surfaced by LLM adapters.
///
/// Cancellation is NOT an error: an aborted upstream request is
/// translated into a clean end-of-stream by the adapter.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("llm provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("llm network error: {0}")]
    Network(String),

    #[error("llm api error: {0}")]
    Api(String),

    #[error("llm configuration error: {0}")]
    Configuration(String),
}

/// Callback type for error delivery. Single sink per adapter.
pub type LlmErrorCallback =
    Arc<dyn Fn(LlmError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Event produced by an in-flight response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// One as-soon-as-produced text fragment of the reply.
    Token(String),
    /// The reply completed normally. Fragments concatenated in arrival
    /// order equal the full reply text.
    Done,
}

/// Lazy, finite, single-consumer sequence of reply fragments.
///
/// The consumer may abandon the stream at any point; dropping it
/// propagates cancellation upstream. A stream that closes without a
/// [`LlmEvent::Done`] was cancelled or failed — the failure, if any,
/// arrives through the registered error sink.
pub struct TokenStream {
    rx: mpsc::Receiver<LlmEvent>,
}

impl TokenStream {
    pub fn new(rx: mpsc::Receiver<LlmEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<LlmEvent> {
        self.rx.recv().await
    }
}

/// Configuration for LLM adapters.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Opaque system directive prepended to every request.
    pub system_prompt: String,
    /// Chat-completions endpoint, overridable for tests and proxies.
    pub endpoint: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            system_prompt: String::new(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }
}

/// Unified token-streaming LLM interface.
#[async_trait]
pub trait BaseLlm: Send {
    /// Start streaming an assistant reply for the given history.
    ///
    /// `client_name`, when present, is forwarded opaquely into the
    /// prompt as caller context.
    async fn stream_response(
        &mut self,
        history: &[ChatTurn],
        client_name: Option<&str>,
    ) -> Result<TokenStream, LlmError>;

    /// Abort the in-flight upstream request. Non-blocking; safe to call
    /// when no stream is active. No fragments are delivered after this
    /// returns.
    fn cancel(&self);

    /// Register the single error sink.
    async fn on_error(&mut self, callback: LlmErrorCallback) -> Result<(), LlmError>;

    /// Provider descriptor.
    fn info(&self) -> ProviderInfo;

    /// Estimated cost in USD of a call over the given history.
    fn estimate_cost(&self, history: &[ChatTurn]) -> f64;
}
