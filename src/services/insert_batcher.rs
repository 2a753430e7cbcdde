//! Buffers decoded insert events and flushes them as bulk writes.
//!
//! The batcher is owned by a single consumer task; both flush triggers (size
//! threshold on append, periodic timer) go through `&mut self`, so detaching
//! the buffer and writing it out can never interleave with a concurrent
//! trigger.

use crate::error::AppResult;
use crate::models::Message;
use crate::store::{ChatStore, ConversationAppend};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy)]
pub struct FlushOutcome {
    pub inserted: usize,
    /// Redelivered `mes_id`s skipped by the store.
    pub duplicates: usize,
    /// Conversations whose pointer update failed and went to the repair queue.
    pub lagging_conversations: usize,
}

pub struct InsertBatcher {
    store: Arc<dyn ChatStore>,
    batch_size: usize,
    buffer: Vec<Message>,
    /// Pointer updates that failed after a successful bulk insert; retried at
    /// the start of every subsequent flush.
    repair_queue: Vec<ConversationAppend>,
}

impl InsertBatcher {
    pub fn new(store: Arc<dyn ChatStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
            repair_queue: Vec::new(),
        }
    }

    /// Appends a message to the buffer; returns true once the size threshold
    /// is reached and the caller should flush.
    pub fn submit(&mut self, message: Message) -> bool {
        self.buffer.push(message);
        self.buffer.len() >= self.batch_size
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn pending_repairs(&self) -> usize {
        self.repair_queue.len()
    }

    /// True once the buffer holds twice the flush threshold, which only
    /// happens while flushes keep failing and requeueing. The consumer stops
    /// fetching until a flush drains the backlog, so the buffer stays bounded
    /// while the store is down.
    pub fn is_saturated(&self) -> bool {
        self.buffer.len() >= self.batch_size * 2
    }

    /// True when a timer tick should trigger a flush.
    pub fn has_work(&self) -> bool {
        !self.buffer.is_empty() || !self.repair_queue.is_empty()
    }

    /// Detaches the buffer, bulk-inserts it, and appends the inserted message
    /// references per conversation, moving each `last_message` pointer to the
    /// batch's last element in arrival order.
    ///
    /// If the bulk insert fails the batch is requeued and the error returned,
    /// so the caller keeps the deliveries unacknowledged and retries; the
    /// batch is never silently dropped. Pointer-update failures do not fail
    /// the flush (the messages are already durable) — they land in the repair
    /// queue instead.
    pub async fn flush(&mut self) -> AppResult<FlushOutcome> {
        self.retry_repairs().await;

        let batch = std::mem::take(&mut self.buffer);
        if batch.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let inserted_ids = match self.store.insert_messages(&batch).await {
            Ok(ids) => ids,
            Err(e) => {
                self.buffer = batch;
                return Err(e);
            }
        };

        let inserted: HashSet<Uuid> = inserted_ids.into_iter().collect();
        let duplicates = batch.len() - inserted.len();

        // Group by conversation, keeping arrival order both across groups and
        // within each group.
        let mut order: Vec<Uuid> = Vec::new();
        let mut groups: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for message in &batch {
            if !inserted.contains(&message.mes_id) {
                continue;
            }
            groups
                .entry(message.conversation_id)
                .or_insert_with(|| {
                    order.push(message.conversation_id);
                    Vec::new()
                })
                .push(message.mes_id);
        }

        let mut lagging = 0;
        for conversation_id in order {
            let message_ids = groups.remove(&conversation_id).unwrap_or_default();
            let Some(&last_message_id) = message_ids.last() else {
                continue;
            };
            let append = ConversationAppend {
                conversation_id,
                message_ids,
                last_message_id,
            };
            if let Err(e) = self.store.append_messages(&append).await {
                tracing::warn!(
                    conversation_id = %append.conversation_id,
                    error = %e,
                    "conversation pointer update failed, queued for repair"
                );
                self.repair_queue.push(append);
                lagging += 1;
            }
        }

        Ok(FlushOutcome {
            inserted: inserted.len(),
            duplicates,
            lagging_conversations: lagging,
        })
    }

    async fn retry_repairs(&mut self) {
        if self.repair_queue.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.repair_queue);
        for append in pending {
            match self.store.append_messages(&append).await {
                Ok(()) => {
                    tracing::info!(
                        conversation_id = %append.conversation_id,
                        "conversation pointer repaired"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %append.conversation_id,
                        error = %e,
                        "conversation pointer repair failed, will retry"
                    );
                    self.repair_queue.push(append);
                }
            }
        }
    }
}
