//! Real-time conversation synchronization.
//!
//! This module keeps a local view of one conversation consistent with the
//! backend reached through a [`Gateway`](crate::gateway::Gateway):
//!
//! - Ordered, deduplicated message list with optimistic sends
//! - Full reload on every change notification, newest request wins
//! - Conversation metadata patches (admin assignment, archiving)
//! - Typing indicators with automatic expiry
//! - Explicit failed-send state with retry and discard

pub mod session;
pub mod store;
pub mod types;
pub mod typing;

pub use session::{Channel, ConversationSession, SessionEvent, SessionState};
pub use store::MessageStore;
pub use typing::TypingTracker;
pub use types::*;
