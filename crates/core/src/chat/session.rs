//! Conversation session: keeps one conversation's local view in sync with
//! the gateway.
//!
//! A session owns a [`MessageStore`] and a [`TypingTracker`] for exactly one
//! conversation. A driver task fetches the initial state, attaches the
//! change subscriptions and then reacts to three kinds of wake-ups:
//!
//! - message-change notifications, each answered by a full reload
//! - conversation metadata patches
//! - typing events and typing expiry
//!
//! Reloads run as their own tasks and are tagged with a sequence number;
//! only the response to the most recently issued reload is applied.

use crate::chat::store::MessageStore;
use crate::chat::types::{Conversation, ConversationPatch, Message, MessageId, MessageStatus};
use crate::chat::typing::TypingTracker;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::gateway::{Gateway, Subscription, Unsubscribe};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fetching metadata and the initial message list
    Initializing,
    /// Synced and accepting actions
    Ready,
    /// Initialization failed; see [`ConversationSession::error`]
    Error,
    /// Torn down by [`ConversationSession::close`]
    Closed,
}

impl SessionState {
    /// Check if the session can no longer become ready.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Error | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Initializing => write!(f, "Initializing"),
            SessionState::Ready => write!(f, "Ready"),
            SessionState::Error => write!(f, "Error"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Remote channels a session listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Messages,
    Conversation,
    Typing,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Messages => "messages",
            Channel::Conversation => "conversation",
            Channel::Typing => "typing",
        }
    }
}

/// Events emitted by a session for UI notification.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session moved to a new lifecycle state.
    StateChanged { state: SessionState },
    /// The visible message list changed.
    MessagesChanged { count: usize },
    /// Conversation metadata was updated remotely.
    ConversationUpdated { conversation: Conversation },
    /// The remote typing signal flipped.
    TypingChanged { is_typing: bool },
    /// A durable write failed; the optimistic entry is kept as failed.
    MessageFailed { message_id: MessageId, error: Error },
    /// A reload after a change notification failed.
    ReloadFailed { error: Error },
    /// A change subscription could not be established or was dropped.
    SubscriptionFailed { channel: Channel, error: Error },
}

struct SessionInner {
    state: SessionState,
    error: Option<Error>,
    conversation: Option<Conversation>,
    store: MessageStore,
    typing: TypingTracker,
    /// Sequence number of the most recently issued reload
    issued_reload: u64,
    subscriptions: Vec<Unsubscribe>,
    tasks: Vec<JoinHandle<()>>,
}

struct Shared {
    conversation_id: String,
    local_user_id: String,
    config: SyncConfig,
    gateway: Arc<dyn Gateway>,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn check_ready(inner: &SessionInner) -> Result<()> {
        match inner.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(Error::Closed),
            SessionState::Initializing | SessionState::Error => Err(Error::NotReady),
        }
    }

    /// Enter the Error state unless the session was closed meanwhile.
    ///
    /// Subscriptions established for the initial load are released.
    fn fail(&self, error: Error) {
        let subscriptions = {
            let mut inner = self.lock();
            if inner.state != SessionState::Initializing {
                return;
            }
            warn!(
                "Session for conversation {} failed to initialize: {}",
                self.conversation_id, error
            );
            inner.error = Some(error);
            self.set_state(&mut inner, SessionState::Error);
            std::mem::take(&mut inner.subscriptions)
        };
        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        self.emit(SessionEvent::StateChanged {
            state: SessionState::Error,
        });
    }

    /// Install the initial state and enter Ready. False if closed meanwhile.
    fn initialize(&self, conversation: Conversation, messages: Vec<Message>) -> bool {
        let count = {
            let mut inner = self.lock();
            if inner.state != SessionState::Initializing {
                return false;
            }
            inner.conversation = Some(conversation);
            inner.store.load(messages);
            self.set_state(&mut inner, SessionState::Ready);
            inner.store.len()
        };

        info!(
            "Session for conversation {} ready with {} message(s)",
            self.conversation_id, count
        );
        self.emit(SessionEvent::StateChanged {
            state: SessionState::Ready,
        });
        self.emit(SessionEvent::MessagesChanged { count });
        true
    }

    /// Keep a freshly established subscription, or report why there is none.
    fn attach<T>(
        &self,
        channel: Channel,
        result: Result<Subscription<T>>,
    ) -> Option<mpsc::UnboundedReceiver<T>> {
        match result {
            Ok(subscription) => {
                let (receiver, handle) = subscription.into_parts();
                let mut inner = self.lock();
                if inner.state == SessionState::Closed {
                    drop(inner);
                    handle.unsubscribe();
                    return None;
                }
                inner.subscriptions.push(handle);
                debug!(
                    "Subscribed to {} changes of conversation {}",
                    channel.as_str(),
                    self.conversation_id
                );
                Some(receiver)
            }
            Err(error) => {
                warn!(
                    "Could not subscribe to {} changes of conversation {}: {}",
                    channel.as_str(),
                    self.conversation_id,
                    error
                );
                let error = match error {
                    Error::SubscriptionFailure(_) => error,
                    other => Error::SubscriptionFailure(other.to_string()),
                };
                self.emit(SessionEvent::SubscriptionFailed { channel, error });
                None
            }
        }
    }

    fn subscription_lost(&self, channel: Channel) {
        if self.lock().state != SessionState::Ready {
            return;
        }
        warn!(
            "Backend dropped the {} subscription of conversation {}",
            channel.as_str(),
            self.conversation_id
        );
        self.emit(SessionEvent::SubscriptionFailed {
            channel,
            error: Error::SubscriptionFailure(format!("{} channel closed", channel.as_str())),
        });
    }

    /// Issue a full reload of the message list in its own task.
    fn spawn_reload(self: &Arc<Self>) {
        let seq = {
            let mut inner = self.lock();
            if inner.state != SessionState::Ready {
                return;
            }
            inner.issued_reload += 1;
            inner.issued_reload
        };
        debug!(
            "Reloading conversation {} (request {})",
            self.conversation_id, seq
        );

        let shared = self.clone();
        let handle = tokio::spawn(async move {
            let result = shared.gateway.fetch_messages(&shared.conversation_id).await;
            shared.finish_reload(seq, result);
        });

        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            handle.abort();
        } else {
            inner.tasks.retain(|task| !task.is_finished());
            inner.tasks.push(handle);
        }
    }

    /// Apply a reload response if it answers the latest request.
    fn finish_reload(&self, seq: u64, result: Result<Vec<Message>>) {
        let event = {
            let mut inner = self.lock();
            if inner.state != SessionState::Ready {
                debug!("Discarding reload {} of a session that is no longer ready", seq);
                return;
            }
            if seq != inner.issued_reload {
                debug!(
                    "Discarding stale reload {} (latest is {})",
                    seq, inner.issued_reload
                );
                return;
            }
            match result {
                Ok(messages) => {
                    inner.store.load(messages);
                    SessionEvent::MessagesChanged {
                        count: inner.store.len(),
                    }
                }
                Err(error) => {
                    warn!(
                        "Reload of conversation {} failed: {}",
                        self.conversation_id, error
                    );
                    SessionEvent::ReloadFailed { error }
                }
            }
        };
        self.emit(event);
    }

    fn apply_patch(&self, patch: ConversationPatch) {
        let updated = {
            let mut inner = self.lock();
            if inner.state != SessionState::Ready {
                return;
            }
            match inner.conversation.as_mut() {
                Some(conversation) => {
                    conversation.apply(&patch);
                    conversation.clone()
                }
                None => return,
            }
        };
        debug!("Conversation {} metadata updated", self.conversation_id);
        self.emit(SessionEvent::ConversationUpdated {
            conversation: updated,
        });
    }

    fn on_typing(&self, user_id: &str) {
        let turned_on = {
            let mut inner = self.lock();
            if inner.state != SessionState::Ready {
                return;
            }
            inner.typing.observe(user_id, Instant::now())
        };
        if turned_on {
            self.emit(SessionEvent::TypingChanged { is_typing: true });
        }
    }

    fn expire_typing(&self) {
        let turned_off = self.lock().typing.expire(Instant::now());
        if turned_off {
            self.emit(SessionEvent::TypingChanged { is_typing: false });
        }
    }

    fn typing_deadline(&self) -> Option<Instant> {
        self.lock().typing.next_deadline()
    }

    /// Perform the durable write for an optimistic entry and reconcile.
    async fn write(&self, optimistic: Message) -> Result<Message> {
        let result = self
            .gateway
            .append_message(&self.conversation_id, &self.local_user_id, &optimistic.text)
            .await;

        let mut inner = self.lock();
        if inner.state == SessionState::Closed {
            return result;
        }

        match result {
            Ok(durable) => {
                inner.store.confirm(&optimistic.id, &durable.id);
                debug!("Message {} stored as {}", optimistic.id, durable.id);
                Ok(durable)
            }
            Err(error) => {
                inner.store.mark_failed(&optimistic.id);
                drop(inner);

                let error = match error {
                    Error::WriteFailure(_) => error,
                    other => Error::WriteFailure(other.to_string()),
                };
                warn!("Failed to send message {}: {}", optimistic.id, error);
                self.emit(SessionEvent::MessageFailed {
                    message_id: optimistic.id.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }
}

/// What woke the driver loop.
enum Wake {
    MessagesChanged,
    Patch(ConversationPatch),
    Typing(String),
    TypingExpired,
    Lost(Channel),
}

async fn next<T>(receiver: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Initialization followed by the event loop. Aborted by `close`.
///
/// Channels are subscribed before the initial fetch. Changes made while the
/// fetch is in flight queue up and are handled once the session is ready.
async fn drive(shared: Arc<Shared>) {
    let gateway = shared.gateway.clone();
    let conversation_id = shared.conversation_id.clone();

    let mut message_rx = shared.attach(
        Channel::Messages,
        gateway.subscribe_message_changes(&conversation_id).await,
    );
    let mut conversation_rx = shared.attach(
        Channel::Conversation,
        gateway.subscribe_conversation_changes(&conversation_id).await,
    );
    let mut typing_rx = shared.attach(
        Channel::Typing,
        gateway.subscribe_typing(&conversation_id).await,
    );

    let conversation = match gateway.fetch_conversation(&conversation_id).await {
        Ok(conversation) => conversation,
        Err(error) => return shared.fail(error),
    };
    let messages = match gateway.fetch_messages(&conversation_id).await {
        Ok(messages) => messages,
        Err(error) => return shared.fail(error),
    };
    if !shared.initialize(conversation, messages) {
        return;
    }

    loop {
        let deadline = shared.typing_deadline();
        if message_rx.is_none()
            && conversation_rx.is_none()
            && typing_rx.is_none()
            && deadline.is_none()
        {
            debug!(
                "No live channels left for conversation {}, driver exiting",
                conversation_id
            );
            return;
        }

        let wake = tokio::select! {
            change = next(&mut message_rx) => match change {
                Some(()) => Wake::MessagesChanged,
                None => Wake::Lost(Channel::Messages),
            },
            patch = next(&mut conversation_rx) => match patch {
                Some(patch) => Wake::Patch(patch),
                None => Wake::Lost(Channel::Conversation),
            },
            user = next(&mut typing_rx) => match user {
                Some(user) => Wake::Typing(user),
                None => Wake::Lost(Channel::Typing),
            },
            _ = sleep_until(deadline) => Wake::TypingExpired,
        };

        match wake {
            Wake::MessagesChanged => shared.spawn_reload(),
            Wake::Patch(patch) => shared.apply_patch(patch),
            Wake::Typing(user) => shared.on_typing(&user),
            Wake::TypingExpired => shared.expire_typing(),
            Wake::Lost(channel) => {
                match channel {
                    Channel::Messages => message_rx = None,
                    Channel::Conversation => conversation_rx = None,
                    Channel::Typing => typing_rx = None,
                }
                shared.subscription_lost(channel);
            }
        }
    }
}

/// Live, synchronized view of one conversation.
///
/// Dropping the session closes it.
pub struct ConversationSession {
    shared: Arc<Shared>,
}

impl ConversationSession {
    /// Open a session and start synchronizing in the background.
    ///
    /// Returns immediately in [`SessionState::Initializing`]; use
    /// [`wait_ready`](Self::wait_ready) to wait for the initial load.
    /// Must be called from within a Tokio runtime.
    pub fn open(
        gateway: Arc<dyn Gateway>,
        conversation_id: impl Into<String>,
        local_user_id: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let local_user_id = local_user_id.into();
        let (state_tx, _) = watch::channel(SessionState::Initializing);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        info!(
            "Opening session for conversation {} as {}",
            conversation_id, local_user_id
        );

        let shared = Arc::new(Shared {
            inner: Mutex::new(SessionInner {
                state: SessionState::Initializing,
                error: None,
                conversation: None,
                store: MessageStore::new(),
                typing: TypingTracker::new(local_user_id.clone(), config.typing_ttl()),
                issued_reload: 0,
                subscriptions: Vec::new(),
                tasks: Vec::new(),
            }),
            conversation_id,
            local_user_id,
            config,
            gateway,
            state_tx,
            events,
        });

        let driver = tokio::spawn(drive(shared.clone()));
        shared.lock().tasks.push(driver);

        Self { shared }
    }

    pub fn conversation_id(&self) -> &str {
        &self.shared.conversation_id
    }

    pub fn local_user_id(&self) -> &str {
        &self.shared.local_user_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Cause of the Error state.
    pub fn error(&self) -> Option<Error> {
        self.shared.lock().error.clone()
    }

    /// Wait until the session leaves Initializing.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.shared.state_tx.subscribe();
        let state = *rx
            .wait_for(|state| *state != SessionState::Initializing)
            .await
            .map_err(|_| Error::Closed)?;

        match state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(Error::Closed),
            SessionState::Error | SessionState::Initializing => {
                Err(self.error().unwrap_or(Error::NotReady))
            }
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Ordered snapshot of the visible messages.
    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().store.all().to_vec()
    }

    /// Optimistic messages whose write failed, ready for retry or discard.
    pub fn failed_messages(&self) -> Vec<Message> {
        self.shared
            .lock()
            .store
            .failed()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn conversation(&self) -> Option<Conversation> {
        self.shared.lock().conversation.clone()
    }

    /// Whether any other participant is currently typing.
    pub fn is_typing(&self) -> bool {
        self.shared.lock().typing.is_typing(Instant::now())
    }

    pub fn typing_users(&self) -> Vec<String> {
        self.shared.lock().typing.typing_users(Instant::now())
    }

    /// Messages from other participants not yet marked read.
    pub fn unread_count(&self) -> usize {
        self.shared
            .lock()
            .store
            .unread_count(&self.shared.local_user_id)
    }

    /// Send a message.
    ///
    /// The message is visible in [`messages`](Self::messages) before the
    /// write completes. On failure it stays visible with
    /// [`MessageStatus::Failed`] and `Error::WriteFailure` is returned.
    pub async fn send_message(&self, text: &str) -> Result<Message> {
        if text.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        let max = self.shared.config.max_message_length;
        if text.len() > max {
            return Err(Error::MessageTooLong(max));
        }

        let optimistic = Message::new_optimistic(
            &self.shared.conversation_id,
            &self.shared.local_user_id,
            text.to_string(),
        );

        let count = {
            let mut inner = self.shared.lock();
            Shared::check_ready(&inner)?;
            inner.store.append_optimistic(optimistic.clone());
            inner.store.len()
        };
        self.shared.emit(SessionEvent::MessagesChanged { count });

        self.shared.write(optimistic).await
    }

    /// Re-send a failed message under its original temporary id.
    pub async fn retry_message(&self, message_id: &MessageId) -> Result<Message> {
        let (message, count) = {
            let mut inner = self.shared.lock();
            Shared::check_ready(&inner)?;
            let message = inner
                .store
                .begin_retry(message_id)
                .ok_or_else(|| Error::UnknownMessage(message_id.to_string()))?;
            (message, inner.store.len())
        };
        info!("Retrying message {}", message_id);
        self.shared.emit(SessionEvent::MessagesChanged { count });

        self.shared.write(message).await
    }

    /// Remove a failed message from the local view.
    ///
    /// False if the message is not a failed one or the session is closed.
    pub fn discard_message(&self, message_id: &MessageId) -> bool {
        let count = {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Closed {
                return false;
            }
            let is_failed = inner
                .store
                .get(message_id)
                .is_some_and(|m| m.status == MessageStatus::Failed);
            if !is_failed || inner.store.discard(message_id).is_none() {
                return false;
            }
            inner.store.len()
        };
        self.shared.emit(SessionEvent::MessagesChanged { count });
        true
    }

    /// Tell the other participants the local user is typing.
    ///
    /// Fire-and-forget; callers throttle repeated calls themselves.
    pub fn notify_typing(&self) -> Result<()> {
        Shared::check_ready(&self.shared.lock())?;
        self.shared
            .gateway
            .broadcast_typing(&self.shared.conversation_id, &self.shared.local_user_id);
        Ok(())
    }

    /// Tear the session down.
    ///
    /// Releases every subscription, stops the driver and any in-flight
    /// reload. Calling it again is a no-op.
    pub fn close(&self) {
        let (subscriptions, tasks) = {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            self.shared.set_state(&mut inner, SessionState::Closed);
            inner.typing.clear();
            (
                std::mem::take(&mut inner.subscriptions),
                std::mem::take(&mut inner.tasks),
            )
        };

        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        for task in &tasks {
            task.abort();
        }

        info!(
            "Closed session for conversation {} ({} subscription(s) released)",
            self.shared.conversation_id,
            subscriptions.len()
        );
        self.shared.emit(SessionEvent::StateChanged {
            state: SessionState::Closed,
        });
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("conversation_id", &self.shared.conversation_id)
            .field("state", &self.state())
            .finish()
    }
}
