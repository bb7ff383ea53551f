//! Wayfare Chat Core Library
//!
//! This crate provides the client-side synchronization layer of the Wayfare
//! travel portal chat, including:
//! - Conversation sessions bound to a remote gateway
//! - Optimistic message sending and reconciliation
//! - Typing indicators
//! - Configuration management
//!
//! It is used by the `wayfare-chat` command line driver.

pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod platform;

// Re-export commonly used types
pub use chat::{
    Conversation, ConversationPatch, ConversationSession, ConversationStatus, Message, MessageId,
    MessageStatus, SessionEvent, SessionState,
};
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use gateway::{Gateway, InMemoryGateway, Subscription, Unsubscribe};
