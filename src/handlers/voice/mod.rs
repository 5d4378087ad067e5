//! Realtime voice WebSocket handler
//!
//! One duplex socket per session: the client streams microphone audio
//! and receives synthesized reply audio plus JSON events. The socket
//! edge lives in `handler`, the wire frames in `messages`, and the
//! per-connection pipeline in `orchestrator`.

pub mod handler;
pub mod messages;
pub mod orchestrator;

pub use handler::{build_providers, voice_handler};
pub use messages::{ClientFrame, ClientMessage, ClientRoute, ErrorKind, ServerEvent, ServerMessage};
pub use orchestrator::{
    OrchestratorSettings, PipelineEvent, ProviderFactory, ProviderSet, VoiceOrchestrator,
};
