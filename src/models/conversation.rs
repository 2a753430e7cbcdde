use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Participant ids; drives the `is_seen` computation for group messages.
    pub users: Vec<Uuid>,
    /// Append-only, arrival order within each flushed batch.
    pub message_ids: Vec<Uuid>,
    pub last_message_id: Option<Uuid>,
}
