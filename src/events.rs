//! Wire formats for the two delivery streams.
//!
//! Insert payloads are camelCase JSON objects shaped like a pre-persistence
//! message. Update payloads are a tagged `MutationEnvelope`, accepted either
//! as a plain object or double-encoded (a JSON string containing the object)
//! for compatibility with existing producers.

use crate::error::{AppError, AppResult};
use crate::models::{Message, MessageStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub mes_id: Uuid,
}

/// Incoming message event on the insert stream, before persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertEvent {
    pub mes_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(default)]
    pub text: String,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub gif_url: Option<String>,
    pub document: Option<String>,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub reply_message: Option<ReplyRef>,
}

fn default_kind() -> String {
    "text".into()
}

impl InsertEvent {
    pub fn into_message(self) -> Message {
        Message {
            mes_id: self.mes_id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            text: self.text,
            image_url: self.image_url,
            video_url: self.video_url,
            gif_url: self.gif_url,
            document: self.document,
            kind: self.kind,
            created_at: self.created_at,
            seen_by: Vec::new(),
            is_seen: false,
            status: MessageStatus::Normal,
            deleted_for: Vec::new(),
            reply_to: self.reply_message.map(|r| r.mes_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DeletionAction {
    #[serde(rename = "deleteForEveryOne")]
    DeleteForEveryOne,
    #[serde(rename = "deleteForMe")]
    DeleteForMe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BlockAction {
    #[serde(rename = "block")]
    Block,
    #[serde(rename = "unblock")]
    Unblock,
}

/// Tagged update envelope. Unknown `actionType` tags fail decoding and are
/// routed to the dead-letter topic rather than silently ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "actionType")]
pub enum MutationEnvelope {
    #[serde(rename = "seen", rename_all = "camelCase")]
    Seen {
        #[serde(rename = "messages")]
        message_ids: Vec<Uuid>,
        message_to_seen_for_user_id: Uuid,
        #[serde(default)]
        is_group: bool,
    },
    #[serde(rename = "deletion", rename_all = "camelCase")]
    Deletion {
        action: DeletionAction,
        message_id: Uuid,
        user_id: Uuid,
    },
    #[serde(rename = "clearChat", rename_all = "camelCase")]
    ClearChat {
        #[serde(rename = "messages")]
        message_ids: Vec<Uuid>,
        user_id: Uuid,
    },
    #[serde(rename = "blockOrUnblock", rename_all = "camelCase")]
    BlockOrUnblock {
        action: BlockAction,
        user_id: Uuid,
        conversation_id: Uuid,
    },
}

pub fn decode_insert(payload: &[u8]) -> AppResult<InsertEvent> {
    serde_json::from_slice(payload).map_err(|e| AppError::Decode(format!("insert event: {e}")))
}

/// Decodes an update payload, trying the plain object form first and falling
/// back to the double-encoded form some producers still emit.
pub fn decode_envelope(payload: &[u8]) -> AppResult<MutationEnvelope> {
    let direct = match serde_json::from_slice::<MutationEnvelope>(payload) {
        Ok(envelope) => return Ok(envelope),
        Err(e) => e,
    };
    if let Ok(inner) = serde_json::from_slice::<String>(payload) {
        return serde_json::from_str(&inner)
            .map_err(|e| AppError::Decode(format!("update envelope (double-encoded): {e}")));
    }
    Err(AppError::Decode(format!("update envelope: {direct}")))
}
