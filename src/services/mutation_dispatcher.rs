//! Routes decoded update envelopes to their mutation. Every operation is
//! idempotent under at-least-once redelivery: set-adds and set-removes are
//! conditional at the store level, and the tombstone assignment converges.

use crate::error::AppResult;
use crate::events::{BlockAction, DeletionAction, MutationEnvelope};
use crate::store::{ChatStore, SeenUpdate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

pub struct MutationDispatcher {
    store: Arc<dyn ChatStore>,
}

impl MutationDispatcher {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, envelope: MutationEnvelope) -> AppResult<()> {
        match envelope {
            MutationEnvelope::Seen {
                message_ids,
                message_to_seen_for_user_id: user_id,
                is_group,
            } => {
                if is_group {
                    self.mark_seen_group(&message_ids, user_id).await
                } else {
                    let changed = self.store.mark_seen_direct(&message_ids, user_id).await?;
                    tracing::debug!(changed, %user_id, "direct seen update applied");
                    Ok(())
                }
            }
            MutationEnvelope::Deletion {
                action,
                message_id,
                user_id,
            } => match action {
                DeletionAction::DeleteForEveryOne => {
                    self.store.tombstone_message(message_id).await
                }
                DeletionAction::DeleteForMe => {
                    self.store.hide_for_user(&[message_id], user_id).await?;
                    Ok(())
                }
            },
            MutationEnvelope::ClearChat {
                message_ids,
                user_id,
            } => {
                if message_ids.is_empty() {
                    return Ok(());
                }
                let hidden = self.store.hide_for_user(&message_ids, user_id).await?;
                tracing::debug!(hidden, %user_id, "chat cleared for user");
                Ok(())
            }
            MutationEnvelope::BlockOrUnblock {
                action,
                user_id,
                conversation_id,
            } => match action {
                BlockAction::Block => self.store.block_conversation(user_id, conversation_id).await,
                BlockAction::Unblock => {
                    self.store
                        .unblock_conversation(user_id, conversation_id)
                        .await
                }
            },
        }
    }

    /// Group seen path: two bulk reads (messages, their conversations), then
    /// one bulk conditional write. Messages already seen by the user are
    /// skipped, so redelivery converges to the same state.
    async fn mark_seen_group(&self, mes_ids: &[Uuid], user_id: Uuid) -> AppResult<()> {
        if mes_ids.is_empty() {
            return Ok(());
        }

        let messages = self.store.messages_by_ids(mes_ids).await?;
        let conversation_ids: Vec<Uuid> = messages
            .iter()
            .map(|m| m.conversation_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let conversations = self.store.conversations_by_ids(&conversation_ids).await?;
        let participants: HashMap<Uuid, i32> = conversations
            .iter()
            .map(|c| (c.id, c.users.len() as i32))
            .collect();

        let mut updates = Vec::new();
        for message in &messages {
            if message.seen_by.contains(&user_id) {
                continue;
            }
            let Some(&participant_count) = participants.get(&message.conversation_id) else {
                tracing::warn!(
                    mes_id = %message.mes_id,
                    conversation_id = %message.conversation_id,
                    "seen update for message in unknown conversation"
                );
                continue;
            };
            // The store derives is_seen from its own state at write time;
            // this read only filters and supplies the participant count.
            updates.push(SeenUpdate {
                mes_id: message.mes_id,
                user_id,
                participant_count,
            });
        }

        if updates.is_empty() {
            return Ok(());
        }
        let changed = self.store.apply_seen_updates(&updates).await?;
        tracing::debug!(changed, %user_id, "group seen updates applied");
        Ok(())
    }
}
