//! Streaming STT over the Deepgram real-time WebSocket API.

mod client;
mod config;
mod messages;

pub use client::DeepgramStt;
pub use config::DeepgramSttConfig;
pub use messages::DeepgramMessage;
