//! In-process gateway backed by plain collections.
//!
//! Behaves like a multi-writer backend: several sessions (and test code
//! acting as other participants) share one instance through an `Arc`.
//! Includes fault injection hooks for exercising failure paths.

use crate::chat::types::{Conversation, ConversationPatch, Message, MessageId, MessageStatus};
use crate::error::{Error, Result};
use crate::gateway::{Gateway, Subscription, Unsubscribe};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};

type Listeners<T> = HashMap<String, Vec<(u64, UnboundedSender<T>)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Messages,
    Conversation,
    Typing,
}

#[derive(Default)]
struct GatewayState {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
    next_message_seq: u64,
    last_created_at: Option<DateTime<Utc>>,

    next_subscription_id: u64,
    message_listeners: Listeners<()>,
    conversation_listeners: Listeners<ConversationPatch>,
    typing_listeners: Listeners<String>,

    fail_appends: usize,
    fail_fetches: usize,
    fail_subscriptions: bool,
    fetch_delays: VecDeque<Duration>,
    append_delay: Option<Duration>,

    fetch_messages_calls: usize,
    append_calls: usize,
    unsubscribe_calls: usize,
    typing_broadcasts: usize,
}

impl GatewayState {
    /// Server clock: never goes backwards within the gateway.
    fn now(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = match self.last_created_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_created_at = Some(now);
        now
    }

    fn remove_listener(&mut self, channel: Channel, conversation_id: &str, id: u64) {
        fn retain<T>(listeners: &mut Listeners<T>, conversation_id: &str, id: u64) {
            if let Some(list) = listeners.get_mut(conversation_id) {
                list.retain(|(sub_id, _)| *sub_id != id);
            }
        }
        match channel {
            Channel::Messages => retain(&mut self.message_listeners, conversation_id, id),
            Channel::Conversation => retain(&mut self.conversation_listeners, conversation_id, id),
            Channel::Typing => retain(&mut self.typing_listeners, conversation_id, id),
        }
        self.unsubscribe_calls += 1;
    }

    fn notify_messages(&mut self, conversation_id: &str) {
        if let Some(list) = self.message_listeners.get_mut(conversation_id) {
            list.retain(|(_, tx)| tx.send(()).is_ok());
        }
    }

    fn notify_conversation(&mut self, conversation_id: &str, patch: ConversationPatch) {
        if let Some(list) = self.conversation_listeners.get_mut(conversation_id) {
            list.retain(|(_, tx)| tx.send(patch.clone()).is_ok());
        }
    }
}

/// Shared in-memory backend.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ==================== Seeding ====================

    /// Create or replace a conversation.
    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut state = self.lock();
        state.messages.entry(conversation.id.clone()).or_default();
        state
            .conversations
            .insert(conversation.id.clone(), conversation);
    }

    /// Store messages as-is, without notifying listeners.
    pub fn seed_messages(&self, conversation_id: &str, messages: Vec<Message>) {
        let mut state = self.lock();
        state
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .extend(messages);
    }

    // ==================== Remote activity ====================

    /// Apply a metadata update and push it to listeners.
    pub fn update_conversation(&self, conversation_id: &str, patch: ConversationPatch) -> Result<()> {
        let mut state = self.lock();
        let now = state.now();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| Error::NotFound(conversation_id.to_string()))?;

        let mut patch = patch;
        patch.updated_at.get_or_insert(now);
        conversation.apply(&patch);

        state.notify_conversation(conversation_id, patch);
        Ok(())
    }

    /// Assign an admin to a conversation.
    pub fn assign_admin(&self, conversation_id: &str, admin_id: &str) -> Result<()> {
        self.update_conversation(
            conversation_id,
            ConversationPatch {
                admin_id: Some(Some(admin_id.to_string())),
                ..Default::default()
            },
        )
    }

    /// Fire a message-change notification without changing any data.
    pub fn touch_messages(&self, conversation_id: &str) {
        self.lock().notify_messages(conversation_id);
    }

    /// Mark every message not written by `reader_id` as read.
    pub fn mark_read(&self, conversation_id: &str, reader_id: &str) -> usize {
        let mut state = self.lock();
        let mut count = 0;
        if let Some(list) = state.messages.get_mut(conversation_id) {
            for msg in list.iter_mut() {
                if !msg.is_from(reader_id) && msg.status != MessageStatus::Read {
                    msg.status = MessageStatus::Read;
                    count += 1;
                }
            }
        }
        if count > 0 {
            state.notify_messages(conversation_id);
        }
        count
    }

    /// Simulate the backend dropping every listener of a conversation.
    pub fn drop_listeners(&self, conversation_id: &str) {
        let mut state = self.lock();
        state.message_listeners.remove(conversation_id);
        state.conversation_listeners.remove(conversation_id);
        state.typing_listeners.remove(conversation_id);
    }

    // ==================== Fault injection ====================

    /// Reject the next `count` appends.
    pub fn fail_next_appends(&self, count: usize) {
        self.lock().fail_appends = count;
    }

    /// Fail the next `count` message fetches with a network error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().fail_fetches = count;
    }

    /// Make every subscription attempt fail.
    pub fn set_fail_subscriptions(&self, fail: bool) {
        self.lock().fail_subscriptions = fail;
    }

    /// Delay the response of the next message fetch not yet delayed.
    ///
    /// The response still carries the data as of the moment it was requested.
    pub fn push_fetch_delay(&self, delay: Duration) {
        self.lock().fetch_delays.push_back(delay);
    }

    /// Delay every append response.
    pub fn set_append_delay(&self, delay: Option<Duration>) {
        self.lock().append_delay = delay;
    }

    // ==================== Inspection ====================

    pub fn fetch_messages_calls(&self) -> usize {
        self.lock().fetch_messages_calls
    }

    pub fn append_calls(&self) -> usize {
        self.lock().append_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.lock().unsubscribe_calls
    }

    pub fn typing_broadcasts(&self) -> usize {
        self.lock().typing_broadcasts
    }

    /// Listeners currently registered for a conversation, across all channels.
    pub fn active_subscriptions(&self, conversation_id: &str) -> usize {
        let state = self.lock();
        let count = |n: Option<usize>| n.unwrap_or(0);
        count(state.message_listeners.get(conversation_id).map(Vec::len))
            + count(state.conversation_listeners.get(conversation_id).map(Vec::len))
            + count(state.typing_listeners.get(conversation_id).map(Vec::len))
    }

    /// Durable messages of a conversation.
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.lock()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Register a listener on one channel and build its subscription.
    fn subscribe<T: Send + 'static>(
        &self,
        channel: Channel,
        conversation_id: &str,
        register: impl FnOnce(&mut GatewayState, u64, UnboundedSender<T>),
    ) -> Result<Subscription<T>> {
        let mut state = self.lock();
        if state.fail_subscriptions {
            return Err(Error::SubscriptionFailure(format!(
                "{:?} channel unavailable for {}",
                channel, conversation_id
            )));
        }
        if !state.conversations.contains_key(conversation_id) {
            return Err(Error::NotFound(conversation_id.to_string()));
        }

        state.next_subscription_id += 1;
        let id = state.next_subscription_id;
        let (tx, rx) = mpsc::unbounded_channel();
        register(&mut state, id, tx);

        let shared = Arc::downgrade(&self.state);
        let conversation_id = conversation_id.to_string();
        let handle = Unsubscribe::new(move || {
            if let Some(shared) = shared.upgrade() {
                let mut state = match shared.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.remove_listener(channel, &conversation_id, id);
            }
        });

        Ok(Subscription::new(rx, handle))
    }
}

#[async_trait::async_trait]
impl Gateway for InMemoryGateway {
    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.lock()
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(conversation_id.to_string()))
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let (snapshot, delay) = {
            let mut state = self.lock();
            state.fetch_messages_calls += 1;
            if state.fail_fetches > 0 {
                state.fail_fetches -= 1;
                return Err(Error::TransientNetwork("connection reset".to_string()));
            }
            let snapshot = state
                .messages
                .get(conversation_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(conversation_id.to_string()))?;
            (snapshot, state.fetch_delays.pop_front())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message> {
        let delay = {
            let mut state = self.lock();
            state.append_calls += 1;
            state.append_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.fail_appends > 0 {
            state.fail_appends -= 1;
            return Err(Error::WriteFailure("backend rejected the write".to_string()));
        }
        if !state.conversations.contains_key(conversation_id) {
            return Err(Error::NotFound(conversation_id.to_string()));
        }

        state.next_message_seq += 1;
        let message = Message {
            id: MessageId(format!("msg-{}", state.next_message_seq)),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            created_at: state.now(),
            status: MessageStatus::Sent,
        };
        state
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        state.notify_messages(conversation_id);

        Ok(message)
    }

    async fn subscribe_message_changes(&self, conversation_id: &str) -> Result<Subscription<()>> {
        self.subscribe(Channel::Messages, conversation_id, |state, id, tx| {
            state
                .message_listeners
                .entry(conversation_id.to_string())
                .or_default()
                .push((id, tx));
        })
    }

    async fn subscribe_conversation_changes(
        &self,
        conversation_id: &str,
    ) -> Result<Subscription<ConversationPatch>> {
        self.subscribe(Channel::Conversation, conversation_id, |state, id, tx| {
            state
                .conversation_listeners
                .entry(conversation_id.to_string())
                .or_default()
                .push((id, tx));
        })
    }

    fn broadcast_typing(&self, conversation_id: &str, user_id: &str) {
        let mut state = self.lock();
        state.typing_broadcasts += 1;
        if let Some(list) = state.typing_listeners.get_mut(conversation_id) {
            list.retain(|(_, tx)| tx.send(user_id.to_string()).is_ok());
        }
    }

    async fn subscribe_typing(&self, conversation_id: &str) -> Result<Subscription<String>> {
        self.subscribe(Channel::Typing, conversation_id, |state, id, tx| {
            state
                .typing_listeners
                .entry(conversation_id.to_string())
                .or_default()
                .push((id, tx));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_with_conversation() -> InMemoryGateway {
        let gateway = InMemoryGateway::new();
        gateway.insert_conversation(Conversation::new(
            "c1".to_string(),
            "traveler".to_string(),
            "Reykjavik".to_string(),
        ));
        gateway
    }

    #[tokio::test]
    async fn test_fetch_unknown_conversation() {
        let gateway = InMemoryGateway::new();
        let err = gateway.fetch_conversation("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_append_assigns_ids_and_notifies() {
        let gateway = gateway_with_conversation();
        let mut sub = gateway.subscribe_message_changes("c1").await.unwrap();

        let first = gateway.append_message("c1", "traveler", "hi").await.unwrap();
        let second = gateway.append_message("c1", "admin", "hello").await.unwrap();

        assert_eq!(first.id.as_str(), "msg-1");
        assert_eq!(second.id.as_str(), "msg-2");
        assert!(first.created_at <= second.created_at);
        assert_eq!(sub.recv().await, Some(()));
        assert_eq!(sub.recv().await, Some(()));
        assert_eq!(gateway.messages("c1").len(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_listener_once() {
        let gateway = gateway_with_conversation();
        let sub = gateway.subscribe_typing("c1").await.unwrap();
        assert_eq!(gateway.active_subscriptions("c1"), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);

        assert_eq!(gateway.active_subscriptions("c1"), 0);
        assert_eq!(gateway.unsubscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_conversation_patch_pushed() {
        let gateway = gateway_with_conversation();
        let mut sub = gateway.subscribe_conversation_changes("c1").await.unwrap();

        gateway.assign_admin("c1", "admin").unwrap();

        let patch = sub.recv().await.unwrap();
        assert_eq!(patch.admin_id, Some(Some("admin".to_string())));
        assert!(patch.updated_at.is_some());
        let conv = gateway.fetch_conversation("c1").await.unwrap();
        assert_eq!(conv.admin_id.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let gateway = gateway_with_conversation();

        gateway.fail_next_appends(1);
        assert!(matches!(
            gateway.append_message("c1", "traveler", "x").await,
            Err(Error::WriteFailure(_))
        ));
        assert!(gateway.append_message("c1", "traveler", "x").await.is_ok());

        gateway.fail_next_fetches(1);
        assert!(matches!(
            gateway.fetch_messages("c1").await,
            Err(Error::TransientNetwork(_))
        ));

        gateway.set_fail_subscriptions(true);
        assert!(matches!(
            gateway.subscribe_typing("c1").await,
            Err(Error::SubscriptionFailure(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_fetch_returns_request_time_snapshot() {
        let gateway = gateway_with_conversation();
        gateway.push_fetch_delay(Duration::from_millis(500));

        let slow = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.fetch_messages("c1").await })
        };
        tokio::task::yield_now().await;

        gateway.append_message("c1", "admin", "late").await.unwrap();

        let snapshot = slow.await.unwrap().unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(gateway.fetch_messages("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read() {
        let gateway = gateway_with_conversation();
        gateway.append_message("c1", "admin", "hi").await.unwrap();
        gateway.append_message("c1", "traveler", "hey").await.unwrap();

        assert_eq!(gateway.mark_read("c1", "traveler"), 1);
        assert_eq!(gateway.mark_read("c1", "traveler"), 0);
    }
}
