//! Common test utilities for integration tests.
//!
//! Shared helpers for driving conversation sessions against the in-memory
//! gateway. Tests run on a paused Tokio clock, so sleeps advance virtual time.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use wayfare_chat_core::{
    Conversation, ConversationSession, InMemoryGateway, Message, MessageId, MessageStatus,
    SessionEvent, SyncConfig,
};

/// Default timeout for test operations.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const CONVERSATION: &str = "c1";
pub const TRAVELER: &str = "traveler-1";
pub const ADMIN: &str = "admin-1";

/// Initialize test logging with appropriate filters.
///
/// Safe to call multiple times (subsequent calls are no-ops).
#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wayfare_chat_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Run an async operation with a timeout.
#[allow(dead_code)]
pub async fn with_timeout<T, F>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .expect("Test operation timed out")
}

/// Poll a condition until it holds.
#[allow(dead_code)]
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    with_timeout(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
}

/// Receive events until one matches.
#[allow(dead_code)]
pub async fn next_event<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut matches: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    with_timeout(async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
}

/// Durable message with a fixed timestamp (seconds since epoch).
pub fn durable(id: &str, at: i64, sender: &str, text: &str) -> Message {
    Message {
        id: MessageId::from(id),
        conversation_id: CONVERSATION.to_string(),
        sender_id: sender.to_string(),
        text: text.to_string(),
        created_at: Utc.timestamp_opt(at, 0).unwrap(),
        status: MessageStatus::Sent,
    }
}

/// Gateway holding conversation `c1` with messages m1 (t=10) and m2 (t=20),
/// seeded out of order.
pub fn seeded_gateway() -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    gateway.insert_conversation(Conversation::new(
        CONVERSATION.to_string(),
        TRAVELER.to_string(),
        "Patagonia trek".to_string(),
    ));
    gateway.seed_messages(
        CONVERSATION,
        vec![
            durable("m2", 20, ADMIN, "Your permits are ready"),
            durable("m1", 10, TRAVELER, "Any news on the permits?"),
        ],
    );
    gateway
}

/// Open a session on `c1` as the traveler without waiting.
pub fn open(gateway: &InMemoryGateway) -> ConversationSession {
    ConversationSession::open(
        Arc::new(gateway.clone()),
        CONVERSATION,
        TRAVELER,
        SyncConfig::default(),
    )
}

/// Open a session and wait until it is ready with all channels attached.
#[allow(dead_code)]
pub async fn open_ready(gateway: &InMemoryGateway) -> ConversationSession {
    let session = open(gateway);
    with_timeout(session.wait_ready())
        .await
        .expect("session failed to become ready");
    wait_until(|| gateway.active_subscriptions(CONVERSATION) == 3).await;
    session
}

/// Ids of the visible messages, in order.
#[allow(dead_code)]
pub fn ids(session: &ConversationSession) -> Vec<String> {
    session.messages().iter().map(|m| m.id.0.clone()).collect()
}
