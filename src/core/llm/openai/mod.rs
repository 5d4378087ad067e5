//! Token-streaming LLM adapter over an OpenAI-compatible
//! chat-completions endpoint.

mod client;
mod messages;

pub use client::OpenAiLlm;
