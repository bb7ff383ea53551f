//! Chat command - interactive session against the in-process gateway.
//!
//! Lines read from stdin are sent as messages. A simulated concierge
//! answers each one, typing first. Commands:
//!
//! - `/typing` broadcast a typing signal
//! - `/fail` make the next send fail
//! - `/retry` re-send every failed message
//! - `/discard` drop every failed message
//! - `/assign <admin>` assign an admin to the conversation
//! - `/quit` close the session

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use wayfare_chat_core::{
    Conversation, ConversationSession, Gateway, InMemoryGateway, Message, SessionEvent,
    SyncConfig,
};

const CONCIERGE: &str = "concierge";

pub async fn execute(
    conversation_id: String,
    user_id: String,
    config_path: Option<String>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            info!("Loading config from: {}", path);
            SyncConfig::load_from(Path::new(&path))?
        }
        None => SyncConfig::load_with_env()?,
    };
    debug!("Session config: {:?}", config);

    let gateway = InMemoryGateway::new();
    gateway.insert_conversation(Conversation::new(
        conversation_id.clone(),
        user_id.clone(),
        "Trip planning".to_string(),
    ));
    gateway
        .append_message(&conversation_id, CONCIERGE, "Welcome! Where would you like to go?")
        .await?;

    let session = ConversationSession::open(
        Arc::new(gateway.clone()),
        conversation_id.clone(),
        user_id.clone(),
        config,
    );
    let mut events = session.subscribe();
    session
        .wait_ready()
        .await
        .with_context(|| format!("failed to open conversation {}", conversation_id))?;

    for message in session.messages() {
        print_message(&message);
    }

    let printer = {
        let user_id = user_id.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::MessagesChanged { count }) => {
                        debug!("{} message(s) visible", count);
                    }
                    Ok(SessionEvent::TypingChanged { is_typing: true }) => {
                        println!("  ({} is typing...)", CONCIERGE);
                    }
                    Ok(SessionEvent::ConversationUpdated { conversation }) => {
                        println!(
                            "  (conversation assigned to {})",
                            conversation.admin_id.as_deref().unwrap_or("nobody")
                        );
                    }
                    Ok(SessionEvent::MessageFailed { message_id, error }) => {
                        println!("  (message {} failed: {}; /retry or /discard)", message_id, error);
                    }
                    Ok(SessionEvent::StateChanged { state }) => {
                        debug!("Session state: {} ({})", state, user_id);
                    }
                    Ok(other) => debug!("Session event: {:?}", other),
                    Err(RecvError::Lagged(n)) => warn!("Dropped {} session events", n),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    println!("Type a message, or /quit to leave.");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit", _) => break,
            ("/typing", _) => session.notify_typing()?,
            ("/fail", _) => {
                gateway.fail_next_appends(1);
                println!("  (next send will fail)");
            }
            ("/retry", _) => {
                for failed in session.failed_messages() {
                    match session.retry_message(&failed.id).await {
                        Ok(message) => print_message(&message),
                        Err(e) => println!("  (retry failed: {})", e),
                    }
                }
            }
            ("/discard", _) => {
                for failed in session.failed_messages() {
                    session.discard_message(&failed.id);
                }
            }
            ("/assign", admin) if !admin.is_empty() => {
                gateway.assign_admin(&conversation_id, admin)?;
            }
            _ => match session.send_message(line).await {
                Ok(message) => {
                    print_message(&message);
                    spawn_concierge_reply(gateway.clone(), conversation_id.clone(), message.text);
                }
                Err(e) => println!("  (not sent: {})", e),
            },
        }
    }

    session.close();
    printer.abort();

    for message in session.messages() {
        print_message(&message);
    }
    info!("Session closed");
    Ok(())
}

/// Have the concierge type for a moment, then answer.
fn spawn_concierge_reply(gateway: InMemoryGateway, conversation_id: String, text: String) {
    tokio::spawn(async move {
        gateway.broadcast_typing(&conversation_id, CONCIERGE);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let reply = format!("Noted: \"{}\". Let me check availability.", text);
        match gateway.append_message(&conversation_id, CONCIERGE, &reply).await {
            Ok(message) => print_message(&message),
            Err(e) => warn!("Concierge reply failed: {}", e),
        }
    });
}

fn print_message(message: &Message) {
    println!(
        "[{}] {} ({}): {}",
        message.created_at.format("%H:%M:%S"),
        message.sender_id,
        message.status.as_str(),
        message.text
    );
}
