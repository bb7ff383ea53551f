//! Remote data gateway abstraction.
//!
//! The backend (durable storage plus real-time notifications) is reached
//! only through the [`Gateway`] trait. Push-style notifications are modelled
//! as a [`Subscription`]: a channel the session reads from, paired with an
//! [`Unsubscribe`] handle that releases the remote listener.

pub mod memory;

use crate::chat::types::{Conversation, ConversationPatch, Message};
use crate::error::Result;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub use memory::InMemoryGateway;

/// Backend capability used by conversation sessions.
///
/// Implementations are shared between sessions, so every method takes `&self`.
#[async_trait::async_trait]
pub trait Gateway: Send + Sync {
    /// Fetch conversation metadata. Fails with `Error::NotFound` for unknown ids.
    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation>;

    /// Fetch the full message list of a conversation, oldest first.
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Durably append a message, returning the stored copy with its real id.
    async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message>;

    /// Notify on every change to the conversation's messages.
    async fn subscribe_message_changes(&self, conversation_id: &str) -> Result<Subscription<()>>;

    /// Deliver partial updates of the conversation metadata.
    async fn subscribe_conversation_changes(
        &self,
        conversation_id: &str,
    ) -> Result<Subscription<ConversationPatch>>;

    /// Broadcast an ephemeral typing event. Best effort, never fails.
    fn broadcast_typing(&self, conversation_id: &str, user_id: &str);

    /// Deliver the user id of every typing event in the conversation.
    async fn subscribe_typing(&self, conversation_id: &str) -> Result<Subscription<String>>;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Releases a remote listener. Runs its cancel action at most once.
pub struct Unsubscribe {
    cancel: Mutex<Option<CancelFn>>,
}

impl Unsubscribe {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Handle with nothing to release.
    pub fn noop() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Release the listener. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        let cancel = match self.cancel.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether the listener has already been released.
    pub fn is_released(&self) -> bool {
        match self.cancel.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Stream of notifications from the gateway plus its release handle.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    handle: Unsubscribe,
}

impl<T> Subscription<T> {
    pub fn new(receiver: mpsc::UnboundedReceiver<T>, handle: Unsubscribe) -> Self {
        Self { receiver, handle }
    }

    /// Wait for the next notification. `None` once the remote side dropped it.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Split into the receiving half and the release handle.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<T>, Unsubscribe) {
        (self.receiver, self.handle)
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = Unsubscribe::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!handle.is_released());
        handle.unsubscribe();
        handle.unsubscribe();
        assert!(handle.is_released());
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (_tx, rx) = mpsc::unbounded_channel::<()>();
        let sub = Subscription::new(
            rx,
            Unsubscribe::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        drop(sub);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recv_after_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(rx, Unsubscribe::noop());
        tx.send(7u32).unwrap();
        drop(tx);
        assert_eq!(sub.recv().await, Some(7));
        assert_eq!(sub.recv().await, None);
    }
}
