//! In-memory message store for a single conversation.

use crate::chat::types::{Message, MessageId, MessageStatus};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Ordered, deduplicated message list for one conversation.
///
/// Holds two kinds of entries:
/// - durable messages, replaced wholesale by every [`load`](Self::load)
/// - optimistic messages with temporary ids, created locally on send
///
/// Optimistic entries survive loads until the durable copy they were
/// confirmed as shows up, at which point they are dropped.
///
/// Invariant: entries are unique by id and sorted ascending by `created_at`,
/// ties keeping insertion order.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    /// temporary id -> durable id, for optimistic entries whose write succeeded
    confirmed: HashMap<MessageId, MessageId>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the durable working set.
    ///
    /// Duplicate ids in `incoming` collapse into one entry at the position of
    /// the first occurrence, carrying the content of the last one.
    pub fn load(&mut self, incoming: Vec<Message>) {
        let mut durable: Vec<Message> = Vec::with_capacity(incoming.len());
        let mut positions: HashMap<MessageId, usize> = HashMap::new();

        for msg in incoming {
            match positions.get(&msg.id) {
                Some(&idx) => durable[idx] = msg,
                None => {
                    positions.insert(msg.id.clone(), durable.len());
                    durable.push(msg);
                }
            }
        }

        let durable_ids: HashSet<&MessageId> = positions.keys().collect();

        let mut superseded = Vec::new();
        let optimistic: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| m.is_optimistic())
            .filter(|m| match self.confirmed.get(&m.id) {
                Some(real) if durable_ids.contains(real) => {
                    superseded.push(m.id.clone());
                    false
                }
                _ => true,
            })
            .collect();

        for id in &superseded {
            self.confirmed.remove(id);
        }
        if !superseded.is_empty() {
            debug!("Reconciled {} optimistic message(s)", superseded.len());
        }

        let mut merged = durable;
        merged.extend(optimistic);
        merged.sort_by_key(|m| m.created_at);
        self.messages = merged;
    }

    /// Insert a provisional message so the sender sees it immediately.
    ///
    /// An entry with the same id is replaced.
    pub fn append_optimistic(&mut self, message: Message) {
        self.messages.retain(|m| m.id != message.id);
        let idx = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(idx, message);
    }

    /// Record that an optimistic message was durably written as `durable_id`.
    ///
    /// If the durable copy already arrived the optimistic entry is dropped
    /// right away; otherwise it is marked sent and dropped on the load that
    /// brings the durable copy in. Returns false for an unknown id.
    pub fn confirm(&mut self, temp_id: &MessageId, durable_id: &MessageId) -> bool {
        let Some(idx) = self.position(temp_id) else {
            return false;
        };

        if self.contains(durable_id) {
            self.messages.remove(idx);
            self.confirmed.remove(temp_id);
        } else {
            self.messages[idx].status = MessageStatus::Sent;
            self.confirmed.insert(temp_id.clone(), durable_id.clone());
        }
        true
    }

    /// Flag an optimistic message whose durable write failed.
    pub fn mark_failed(&mut self, temp_id: &MessageId) -> bool {
        match self.optimistic_mut(temp_id) {
            Some(msg) => {
                msg.status = MessageStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Move a failed message back to pending and return a copy for re-sending.
    pub fn begin_retry(&mut self, temp_id: &MessageId) -> Option<Message> {
        let msg = self.optimistic_mut(temp_id)?;
        if msg.status != MessageStatus::Failed {
            return None;
        }
        msg.status = MessageStatus::Pending;
        Some(msg.clone())
    }

    /// Remove an optimistic message.
    pub fn discard(&mut self, temp_id: &MessageId) -> Option<Message> {
        if !temp_id.is_temporary() {
            return None;
        }
        let idx = self.position(temp_id)?;
        self.confirmed.remove(temp_id);
        Some(self.messages.remove(idx))
    }

    /// Current ordered sequence.
    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    /// Look up a message by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Check whether a message id is present.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of optimistic messages whose write is still in flight.
    pub fn pending_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_optimistic() && m.status == MessageStatus::Pending)
            .count()
    }

    /// Optimistic messages whose durable write failed.
    pub fn failed(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Failed)
            .collect()
    }

    /// Messages from other participants not yet read.
    pub fn unread_count(&self, local_user_id: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.is_from(local_user_id) && m.status != MessageStatus::Read)
            .count()
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    fn optimistic_mut(&mut self, temp_id: &MessageId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| &m.id == temp_id && m.is_optimistic())
    }
}
