//! Streaming TTS over the ElevenLabs multi-stream WebSocket API.

mod client;
mod messages;

pub use client::ElevenLabsTts;
