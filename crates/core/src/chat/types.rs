//! Core data types for the chat system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Prefix carried by client-generated message ids.
pub const TEMP_ID_PREFIX: &str = "local-";

/// Unique identifier for a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new temporary id for an optimistic message.
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Whether this id was generated locally and not yet confirmed.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Shown optimistically, durable write still in flight.
    #[default]
    Pending,
    /// Durably stored by the backend.
    Sent,
    /// Recipient's client has seen it arrive.
    Delivered,
    /// Recipient has read the message.
    Read,
    /// Durable write was rejected; kept locally for retry.
    Failed,
}

impl MessageStatus {
    /// Get a human-readable string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Durable id, or a temporary id while optimistic.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: String,
    /// Author of the message.
    pub sender_id: String,
    /// Message body, never empty.
    pub text: String,
    /// Creation time used for ordering.
    pub created_at: DateTime<Utc>,
    /// Delivery/read state.
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    /// Create a provisional outgoing message with a temporary id.
    pub fn new_optimistic(conversation_id: &str, sender_id: &str, text: String) -> Self {
        Self {
            id: MessageId::temporary(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text,
            created_at: Utc::now(),
            status: MessageStatus::Pending,
        }
    }

    /// Whether this entry is a local stand-in for a not-yet-confirmed write.
    pub fn is_optimistic(&self) -> bool {
        self.id.is_temporary()
    }

    /// Check if this message was written by the given user.
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}

/// Lifecycle of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
}

/// Conversation metadata between a traveler and (eventually) an admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub traveler_id: String,
    /// `None` until an admin picks the conversation up.
    #[serde(default)]
    pub admin_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new unassigned conversation opened by a traveler.
    pub fn new(id: String, traveler_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            traveler_id,
            admin_id: None,
            title,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an admin has been assigned.
    pub fn is_assigned(&self) -> bool {
        self.admin_id.is_some()
    }

    /// Check if a user takes part in this conversation.
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.traveler_id == user_id || self.admin_id.as_deref() == Some(user_id)
    }

    /// Merge a partial update into this conversation.
    pub fn apply(&mut self, patch: &ConversationPatch) {
        if let Some(admin_id) = &patch.admin_id {
            self.admin_id = admin_id.clone();
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }
}

/// Partial conversation update pushed by the metadata subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationPatch {
    /// `Some(None)` unassigns, `Some(Some(id))` assigns.
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub admin_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConversationPatch {
    /// Check if the patch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.admin_id.is_none()
            && self.title.is_none()
            && self.status.is_none()
            && self.updated_at.is_none()
    }
}

/// Distinguish an explicit `null` from an absent field.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_ids() {
        let id1 = MessageId::temporary();
        let id2 = MessageId::temporary();
        assert_ne!(id1, id2);
        assert!(id1.is_temporary());
        assert!(!MessageId::from("m1").is_temporary());
    }

    #[test]
    fn test_optimistic_message() {
        let msg = Message::new_optimistic("c1", "traveler", "Hello".to_string());
        assert!(msg.is_optimistic());
        assert_eq!(msg.status, MessageStatus::Pending);
        assert!(msg.is_from("traveler"));
        assert!(!msg.is_from("admin"));
    }

    #[test]
    fn test_conversation_assignment() {
        let mut conv = Conversation::new("c1".into(), "t1".into(), "Lisbon trip".into());
        assert!(!conv.is_assigned());
        assert!(conv.has_participant("t1"));
        assert!(!conv.has_participant("a1"));

        conv.apply(&ConversationPatch {
            admin_id: Some(Some("a1".to_string())),
            ..Default::default()
        });
        assert!(conv.is_assigned());
        assert!(conv.has_participant("a1"));

        conv.apply(&ConversationPatch {
            status: Some(ConversationStatus::Archived),
            ..Default::default()
        });
        assert_eq!(conv.status, ConversationStatus::Archived);
        assert_eq!(conv.admin_id.as_deref(), Some("a1"));

        conv.apply(&ConversationPatch {
            admin_id: Some(None),
            ..Default::default()
        });
        assert!(!conv.is_assigned());
    }

    #[test]
    fn test_patch_wire_format() {
        let patch: ConversationPatch =
            serde_json::from_str(r#"{ "title": "Kyoto", "status": "archived" }"#).unwrap();
        assert_eq!(patch.title.as_deref(), Some("Kyoto"));
        assert_eq!(patch.status, Some(ConversationStatus::Archived));
        assert!(patch.admin_id.is_none());
        assert!(!patch.is_empty());
        assert!(ConversationPatch::default().is_empty());

        let unassign: ConversationPatch = serde_json::from_str(r#"{ "admin_id": null }"#).unwrap();
        assert_eq!(unassign.admin_id, Some(None));
    }
}
