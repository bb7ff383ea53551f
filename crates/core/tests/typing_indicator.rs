//! Typing Indicator Tests
//!
//! Typing signals travel over the gateway's ephemeral broadcast channel and
//! expire on the session's timer. All tests run on a paused clock.

mod common;

use common::*;
use std::time::Duration;
use wayfare_chat_core::{Gateway, SessionEvent, SyncConfig};

#[tokio::test(start_paused = true)]
async fn test_typing_sets_and_expires() {
    let gateway = seeded_gateway();
    let session = open_ready(&gateway).await;
    let mut events = session.subscribe();

    gateway.broadcast_typing(CONVERSATION, ADMIN);
    wait_until(|| session.is_typing()).await;
    assert_eq!(session.typing_users(), vec![ADMIN.to_string()]);

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert!(session.is_typing());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.is_typing());

    next_event(&mut events, |e| {
        matches!(e, SessionEvent::TypingChanged { is_typing: false })
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_renewal_restarts_window() {
    let gateway = seeded_gateway();
    let session = open_ready(&gateway).await;

    gateway.broadcast_typing(CONVERSATION, ADMIN);
    wait_until(|| session.is_typing()).await;

    tokio::time::sleep(Duration::from_millis(2000)).await;
    gateway.broadcast_typing(CONVERSATION, ADMIN);
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Past the first window, inside the renewed one.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(session.is_typing());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!session.is_typing());
}

#[tokio::test(start_paused = true)]
async fn test_own_typing_is_not_shown() {
    let gateway = seeded_gateway();
    let session = open_ready(&gateway).await;

    session.notify_typing().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(gateway.typing_broadcasts(), 1);
    assert!(!session.is_typing());
}

#[tokio::test(start_paused = true)]
async fn test_typing_reaches_other_session() {
    let gateway = seeded_gateway();
    let traveler = open(&gateway);
    let admin = wayfare_chat_core::ConversationSession::open(
        std::sync::Arc::new(gateway.clone()),
        CONVERSATION,
        ADMIN,
        SyncConfig {
            typing_ttl_ms: 1000,
            ..SyncConfig::default()
        },
    );
    traveler.wait_ready().await.unwrap();
    admin.wait_ready().await.unwrap();
    wait_until(|| gateway.active_subscriptions(CONVERSATION) == 6).await;

    traveler.notify_typing().unwrap();
    wait_until(|| admin.is_typing()).await;
    assert!(!traveler.is_typing());

    // The admin session uses its own, shorter window.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!admin.is_typing());
}

#[tokio::test(start_paused = true)]
async fn test_close_clears_typing() {
    let gateway = seeded_gateway();
    let session = open_ready(&gateway).await;

    gateway.broadcast_typing(CONVERSATION, ADMIN);
    wait_until(|| session.is_typing()).await;

    session.close();
    assert!(!session.is_typing());
}
