pub mod buffer;

pub use buffer::{AudioBufferManager, AudioChunk};
