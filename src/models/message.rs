use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Normal,
    Deleted,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Normal => "normal",
            MessageStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "deleted" => MessageStatus::Deleted,
            _ => MessageStatus::Normal,
        }
    }
}

/// A chat message as persisted. `mes_id` is producer-assigned and unique;
/// redelivered inserts with the same id are skipped by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub mes_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub gif_url: Option<String>,
    pub document: Option<String>,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    /// Set semantics; only ever grows.
    pub seen_by: Vec<Uuid>,
    /// Derived: true iff `seen_by` covers the conversation's participants.
    pub is_seen: bool,
    pub status: MessageStatus,
    /// Users who locally hid this message (delete-for-me / clear-chat).
    pub deleted_for: Vec<Uuid>,
    /// Weak back-reference to the replied-to message, never an ownership edge.
    pub reply_to: Option<Uuid>,
}
