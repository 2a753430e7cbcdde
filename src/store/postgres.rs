use crate::error::AppResult;
use crate::models::{Conversation, Message, MessageStatus};
use crate::store::{ChatStore, ConversationAppend, SeenUpdate};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "mes_id, conversation_id, sender_id, text, image_url, video_url, \
     gif_url, document, kind, created_at, seen_by, is_seen, status, deleted_for, reply_to";

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn message_from_row(row: &PgRow) -> Result<Message, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Message {
        mes_id: row.try_get("mes_id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        text: row.try_get("text")?,
        image_url: row.try_get("image_url")?,
        video_url: row.try_get("video_url")?,
        gif_url: row.try_get("gif_url")?,
        document: row.try_get("document")?,
        kind: row.try_get("kind")?,
        created_at: row.try_get("created_at")?,
        seen_by: row.try_get("seen_by")?,
        is_seen: row.try_get("is_seen")?,
        status: MessageStatus::parse(&status),
        deleted_for: row.try_get("deleted_for")?,
        reply_to: row.try_get("reply_to")?,
    })
}

#[async_trait]
impl ChatStore for PgStore {
    async fn insert_messages(&self, messages: &[Message]) -> AppResult<Vec<Uuid>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO messages ({MESSAGE_COLUMNS}) "));
        builder.push_values(messages, |mut b, m| {
            b.push_bind(m.mes_id)
                .push_bind(m.conversation_id)
                .push_bind(m.sender_id)
                .push_bind(&m.text)
                .push_bind(&m.image_url)
                .push_bind(&m.video_url)
                .push_bind(&m.gif_url)
                .push_bind(&m.document)
                .push_bind(&m.kind)
                .push_bind(m.created_at)
                .push_bind(&m.seen_by)
                .push_bind(m.is_seen)
                .push_bind(m.status.as_str())
                .push_bind(&m.deleted_for)
                .push_bind(m.reply_to);
        });
        builder.push(" ON CONFLICT (mes_id) DO NOTHING RETURNING mes_id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let inserted = rows
            .iter()
            .map(|row| row.try_get("mes_id"))
            .collect::<Result<Vec<Uuid>, _>>()?;
        Ok(inserted)
    }

    async fn messages_by_ids(&self, mes_ids: &[Uuid]) -> AppResult<Vec<Message>> {
        if mes_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE mes_id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(mes_ids)
            .fetch_all(&self.pool)
            .await?;
        let messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    async fn conversations_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Conversation>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, users, message_ids, last_message_id FROM conversations WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        let conversations = rows
            .iter()
            .map(|row| {
                Ok(Conversation {
                    id: row.try_get("id")?,
                    users: row.try_get("users")?,
                    message_ids: row.try_get("message_ids")?,
                    last_message_id: row.try_get("last_message_id")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(conversations)
    }

    async fn append_messages(&self, append: &ConversationAppend) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE conversations \
             SET message_ids = message_ids || $2::uuid[], last_message_id = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(append.conversation_id)
        .bind(&append.message_ids)
        .bind(append.last_message_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Conversations are created upstream; an unknown id means the
            // producer raced conversation creation. The messages themselves
            // are durable either way.
            tracing::warn!(
                conversation_id = %append.conversation_id,
                "pointer update matched no conversation"
            );
        }
        Ok(())
    }

    async fn apply_seen_updates(&self, updates: &[SeenUpdate]) -> AppResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut changed = 0u64;
        for update in updates {
            // is_seen is derived from the stored array inside the UPDATE, so
            // a handler holding a stale read of seen_by cannot clear it.
            let result = sqlx::query(
                "UPDATE messages \
                 SET seen_by = array_append(seen_by, $2), \
                     is_seen = cardinality(array_append(seen_by, $2)) >= $3 \
                 WHERE mes_id = $1 AND NOT (seen_by @> ARRAY[$2]::uuid[])",
            )
            .bind(update.mes_id)
            .bind(update.user_id)
            .bind(update.participant_count)
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }
        tx.commit().await?;
        Ok(changed)
    }

    async fn mark_seen_direct(&self, mes_ids: &[Uuid], user_id: Uuid) -> AppResult<u64> {
        if mes_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE messages \
             SET seen_by = CASE WHEN seen_by @> ARRAY[$2]::uuid[] THEN seen_by \
                 ELSE array_append(seen_by, $2) END, \
                 is_seen = TRUE \
             WHERE mes_id = ANY($1)",
        )
        .bind(mes_ids)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn tombstone_message(&self, mes_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE messages SET status = 'deleted' WHERE mes_id = $1")
            .bind(mes_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn hide_for_user(&self, mes_ids: &[Uuid], user_id: Uuid) -> AppResult<u64> {
        if mes_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE messages SET deleted_for = array_append(deleted_for, $2) \
             WHERE mes_id = ANY($1) AND NOT (deleted_for @> ARRAY[$2]::uuid[])",
        )
        .bind(mes_ids)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn block_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (id, blocked_conversations) VALUES ($1, ARRAY[$2]::uuid[]) \
             ON CONFLICT (id) DO UPDATE \
             SET blocked_conversations = CASE \
                 WHEN users.blocked_conversations @> ARRAY[$2]::uuid[] THEN users.blocked_conversations \
                 ELSE array_append(users.blocked_conversations, $2) END",
        )
        .bind(user_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unblock_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE users SET blocked_conversations = array_remove(blocked_conversations, $2) \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
