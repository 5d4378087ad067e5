//! Per-session record: identity, activity tracking, metadata, bounded
//! conversation history, and pipeline state flags.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::llm::{ChatRole, ChatTurn};

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

impl From<TurnRole> for ChatRole {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => ChatRole::User,
            TurnRole::Assistant => ChatRole::Assistant,
        }
    }
}

/// One entry in the session history.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: SystemTime,
}

/// Pipeline state flags, mutated only by the owning orchestrator.
#[derive(Debug, Default)]
pub struct SessionFlags {
    active: AtomicBool,
    stt_connected: AtomicBool,
    tts_connected: AtomicBool,
    llm_streaming: AtomicBool,
    tts_streaming: AtomicBool,
    agent_speaking: AtomicBool,
}

macro_rules! flag_accessors {
    ($($get:ident / $set:ident => $field:ident),+ $(,)?) => {
        $(
            pub fn $get(&self) -> bool {
                self.$field.load(Ordering::Acquire)
            }

            pub fn $set(&self, value: bool) {
                self.$field.store(value, Ordering::Release);
            }
        )+
    };
}

impl SessionFlags {
    flag_accessors! {
        is_active / set_active => active,
        is_stt_connected / set_stt_connected => stt_connected,
        is_tts_connected / set_tts_connected => tts_connected,
        is_llm_streaming / set_llm_streaming => llm_streaming,
        is_tts_streaming / set_tts_streaming => tts_streaming,
        is_agent_speaking / set_agent_speaking => agent_speaking,
    }
}

/// Per-connection session state.
///
/// The registry holds a shared handle for lookup and reaping; providers
/// and buffers are owned exclusively by the orchestrator task. Reaping
/// is signalled through [`Session::shutdown`]; the owning orchestrator
/// observes the token and tears the pipeline down.
pub struct Session {
    /// Process-unique opaque identifier (uuid v4 rendered as text).
    pub id: String,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    metadata: Mutex<HashMap<String, String>>,
    history: Mutex<VecDeque<ConversationTurn>>,
    max_history: usize,
    pub flags: SessionFlags,
    /// Cancelled by the reaper (or any fatal path) to request teardown.
    pub shutdown: CancellationToken,
}

impl Session {
    pub fn new(id: String, metadata: HashMap<String, String>, max_history: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_activity: Mutex::new(now),
            metadata: Mutex::new(metadata),
            history: Mutex::new(VecDeque::new()),
            max_history: max_history.max(1),
            flags: SessionFlags::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Record activity; called on every message touching the session.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Session age since creation.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Merge metadata entries from the client.
    pub fn update_metadata(&self, entries: HashMap<String, String>) {
        self.metadata.lock().extend(entries);
    }

    /// The one metadata key the core reads; forwarded opaquely into LLM
    /// prompts.
    pub fn client_name(&self) -> Option<String> {
        self.metadata.lock().get("clientName").cloned()
    }

    /// Append a turn, dropping the oldest entries beyond the bound.
    /// Never drops the newest.
    pub fn append_turn(&self, role: TurnRole, content: impl Into<String>) {
        let mut history = self.history.lock();
        while history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(ConversationTurn {
            role,
            content: content.into(),
            timestamp: SystemTime::now(),
        });
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Shallow `{role, content}` copy of the history, suitable for the
    /// LLM adapter.
    pub fn formatted_history(&self) -> Vec<ChatTurn> {
        self.history
            .lock()
            .iter()
            .map(|turn| ChatTurn {
                role: turn.role.into(),
                content: turn.content.clone(),
            })
            .collect()
    }

    /// Full history snapshot, timestamps included. Test and debug hook.
    pub fn history_snapshot(&self) -> Vec<ConversationTurn> {
        self.history.lock().iter().cloned().collect()
    }
}
