#![allow(dead_code)]

use async_trait::async_trait;
use chat_ingest_service::error::{AppError, AppResult};
use chat_ingest_service::models::{Conversation, Message, MessageStatus, User};
use chat_ingest_service::store::{ChatStore, ConversationAppend, SeenUpdate};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory `ChatStore` double with failure injection for exercising the
/// batcher's requeue and repair paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_insert: AtomicBool,
    fail_append: AtomicBool,
}

#[derive(Default)]
struct Inner {
    messages: HashMap<Uuid, Message>,
    conversations: HashMap<Uuid, Conversation>,
    users: HashMap<Uuid, User>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_conversation(&self, id: Uuid, users: Vec<Uuid>) {
        self.inner.lock().unwrap().conversations.insert(
            id,
            Conversation {
                id,
                users,
                message_ids: Vec::new(),
                last_message_id: None,
            },
        );
    }

    pub fn seed_message(&self, message: Message) {
        self.inner
            .lock()
            .unwrap()
            .messages
            .insert(message.mes_id, message);
    }

    pub fn message(&self, mes_id: Uuid) -> Option<Message> {
        self.inner.lock().unwrap().messages.get(&mes_id).cloned()
    }

    pub fn conversation(&self, id: Uuid) -> Option<Conversation> {
        self.inner.lock().unwrap().conversations.get(&id).cloned()
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.inner.lock().unwrap().users.get(&id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn set_fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_append(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn insert_messages(&self, messages: &[Message]) -> AppResult<Vec<Uuid>> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(AppError::Transient("injected insert failure".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        let mut inserted = Vec::new();
        for message in messages {
            if inner.messages.contains_key(&message.mes_id) {
                continue;
            }
            inner.messages.insert(message.mes_id, message.clone());
            inserted.push(message.mes_id);
        }
        Ok(inserted)
    }

    async fn messages_by_ids(&self, mes_ids: &[Uuid]) -> AppResult<Vec<Message>> {
        let inner = self.inner.lock().unwrap();
        Ok(mes_ids
            .iter()
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect())
    }

    async fn conversations_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Conversation>> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| inner.conversations.get(id).cloned())
            .collect())
    }

    async fn append_messages(&self, append: &ConversationAppend) -> AppResult<()> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(AppError::Transient("injected append failure".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(conversation) = inner.conversations.get_mut(&append.conversation_id) {
            conversation
                .message_ids
                .extend(append.message_ids.iter().copied());
            conversation.last_message_id = Some(append.last_message_id);
        }
        Ok(())
    }

    async fn apply_seen_updates(&self, updates: &[SeenUpdate]) -> AppResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut changed = 0;
        for update in updates {
            if let Some(message) = inner.messages.get_mut(&update.mes_id) {
                if !message.seen_by.contains(&update.user_id) {
                    message.seen_by.push(update.user_id);
                    message.is_seen =
                        message.seen_by.len() as i32 >= update.participant_count;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn mark_seen_direct(&self, mes_ids: &[Uuid], user_id: Uuid) -> AppResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut changed = 0;
        for mes_id in mes_ids {
            if let Some(message) = inner.messages.get_mut(mes_id) {
                if !message.seen_by.contains(&user_id) {
                    message.seen_by.push(user_id);
                }
                message.is_seen = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn tombstone_message(&self, mes_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(message) = inner.messages.get_mut(&mes_id) {
            message.status = MessageStatus::Deleted;
        }
        Ok(())
    }

    async fn hide_for_user(&self, mes_ids: &[Uuid], user_id: Uuid) -> AppResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut changed = 0;
        for mes_id in mes_ids {
            if let Some(message) = inner.messages.get_mut(mes_id) {
                if !message.deleted_for.contains(&user_id) {
                    message.deleted_for.push(user_id);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn block_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner.users.entry(user_id).or_insert_with(|| User {
            id: user_id,
            blocked_conversations: Vec::new(),
        });
        if !user.blocked_conversations.contains(&conversation_id) {
            user.blocked_conversations.push(conversation_id);
        }
        Ok(())
    }

    async fn unblock_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.blocked_conversations.retain(|id| *id != conversation_id);
        }
        Ok(())
    }
}

pub fn message_in(conversation_id: Uuid) -> Message {
    Message {
        mes_id: Uuid::new_v4(),
        conversation_id,
        sender_id: Uuid::new_v4(),
        text: "hello".into(),
        image_url: None,
        video_url: None,
        gif_url: None,
        document: None,
        kind: "text".into(),
        created_at: Utc::now(),
        seen_by: Vec::new(),
        is_seen: false,
        status: MessageStatus::Normal,
        deleted_for: Vec::new(),
        reply_to: None,
    }
}
