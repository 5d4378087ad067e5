pub mod record;
pub mod registry;

pub use record::{ConversationTurn, Session, SessionFlags, TurnRole};
pub use registry::SessionRegistry;
