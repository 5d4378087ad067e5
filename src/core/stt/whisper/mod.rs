//! Buffered STT over a one-shot Whisper-style transcription endpoint.
//!
//! The recognizer has no streaming interface, so the adapter turns it
//! into a low-latency utterance detector: large client frames are
//! submitted directly as self-contained utterances, undersized frames
//! accumulate until a periodic sweep concatenates and submits them.

mod client;
mod config;
mod messages;

pub use client::WhisperStt;
pub use config::WhisperSttConfig;
