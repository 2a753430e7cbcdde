//! Persistence seam. Pipeline logic depends only on the `ChatStore` trait;
//! the PostgreSQL implementation lives in `postgres`.

pub mod postgres;

use crate::error::AppResult;
use crate::models::{Conversation, Message};
use async_trait::async_trait;
use uuid::Uuid;

/// One conditional seen-update, guarded at the store level by
/// "user not yet in seen_by". The store derives `is_seen` from the updated
/// stored array against `participant_count`, so handlers working from stale
/// reads and redelivered envelopes both converge to the same state.
#[derive(Debug, Clone)]
pub struct SeenUpdate {
    pub mes_id: Uuid,
    pub user_id: Uuid,
    pub participant_count: i32,
}

/// Per-conversation result of a flush: message references to append plus the
/// new last-message pointer (the batch's last element in arrival order).
#[derive(Debug, Clone)]
pub struct ConversationAppend {
    pub conversation_id: Uuid,
    pub message_ids: Vec<Uuid>,
    pub last_message_id: Uuid,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Bulk insert; conflicting `mes_id`s are skipped. Returns the ids that
    /// were actually inserted — callers must only rely on those.
    async fn insert_messages(&self, messages: &[Message]) -> AppResult<Vec<Uuid>>;

    async fn messages_by_ids(&self, mes_ids: &[Uuid]) -> AppResult<Vec<Message>>;

    async fn conversations_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Conversation>>;

    /// Appends message references and moves the last-message pointer.
    async fn append_messages(&self, append: &ConversationAppend) -> AppResult<()>;

    /// Bulk conditional write for the group seen path. Returns how many
    /// messages actually changed.
    async fn apply_seen_updates(&self, updates: &[SeenUpdate]) -> AppResult<u64>;

    /// Non-group seen path: set-adds the user and unconditionally marks the
    /// targets seen.
    async fn mark_seen_direct(&self, mes_ids: &[Uuid], user_id: Uuid) -> AppResult<u64>;

    /// delete-for-everyone tombstone; idempotent by construction.
    async fn tombstone_message(&self, mes_id: Uuid) -> AppResult<()>;

    /// Set-adds the user to `deleted_for` on every target (delete-for-me and
    /// clear-chat share this operation).
    async fn hide_for_user(&self, mes_ids: &[Uuid], user_id: Uuid) -> AppResult<u64>;

    async fn block_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()>;

    async fn unblock_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()>;
}
