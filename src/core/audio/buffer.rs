//! Per-session audio buffer manager.
//!
//! Two bounded queues of opaque byte chunks (inbound from the client,
//! outbound synthesized audio) plus a currently-playing marker. The
//! outbound queue carries a monotonically increasing generation counter:
//! a barge-in bumps the generation and every chunk of a prior generation
//! is discarded in transit, so no stale audio reaches the client even
//! when it was already queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;

/// Maximum chunks retained per queue; oldest are dropped beyond this.
const DEFAULT_MAX_QUEUED: usize = 256;

/// One queued audio chunk.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub bytes: Bytes,
    pub enqueued_at: Instant,
    /// Reply epoch this chunk belongs to. Meaningful on the outbound
    /// queue only; inbound chunks carry the epoch they arrived in.
    pub generation: u64,
}

/// Bounded inbound/outbound audio queues with a cancellable
/// currently-playing marker.
pub struct AudioBufferManager {
    inbound: Mutex<VecDeque<AudioChunk>>,
    outbound: Mutex<VecDeque<AudioChunk>>,
    now_playing: Mutex<Option<AudioChunk>>,
    generation: AtomicU64,
    max_queued: usize,
}

impl Default for AudioBufferManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUEUED)
    }
}

impl AudioBufferManager {
    pub fn new(max_queued: usize) -> Self {
        Self {
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(VecDeque::new()),
            now_playing: Mutex::new(None),
            generation: AtomicU64::new(0),
            max_queued: max_queued.max(1),
        }
    }

    /// Current output generation ("reply epoch").
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Bump the generation, invalidating all queued output of the prior
    /// epoch. Returns the new generation.
    pub fn bump_generation(&self) -> u64 {
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.outbound.lock().clear();
        *self.now_playing.lock() = None;
        next
    }

    /// Record one inbound client chunk.
    pub fn push_inbound(&self, bytes: Bytes) {
        let mut queue = self.inbound.lock();
        if queue.len() >= self.max_queued {
            queue.pop_front();
        }
        queue.push_back(AudioChunk {
            bytes,
            enqueued_at: Instant::now(),
            generation: self.current_generation(),
        });
    }

    /// Queue one synthesized chunk, tagged with the current generation.
    pub fn push_outbound(&self, bytes: Bytes) -> u64 {
        let generation = self.current_generation();
        let mut queue = self.outbound.lock();
        if queue.len() >= self.max_queued {
            queue.pop_front();
        }
        queue.push_back(AudioChunk {
            bytes,
            enqueued_at: Instant::now(),
            generation,
        });
        generation
    }

    /// Dequeue the next playable chunk, skipping anything from a stale
    /// generation, and mark it currently playing.
    pub fn pop_outbound(&self) -> Option<AudioChunk> {
        let current = self.current_generation();
        let mut queue = self.outbound.lock();
        while let Some(chunk) = queue.pop_front() {
            if chunk.generation == current {
                *self.now_playing.lock() = Some(chunk.clone());
                return Some(chunk);
            }
            // Stale epoch: discard in transit.
        }
        None
    }

    /// The chunk most recently handed out for playback, if it belongs to
    /// the current generation.
    pub fn now_playing(&self) -> Option<AudioChunk> {
        let current = self.current_generation();
        self.now_playing
            .lock()
            .clone()
            .filter(|chunk| chunk.generation == current)
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.lock().len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.lock().len()
    }

    /// Drop everything, both directions.
    pub fn clear(&self) {
        self.inbound.lock().clear();
        self.outbound.lock().clear();
        *self.now_playing.lock() = None;
    }
}
