use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{AppendOutcome, MessagingStore, ReadOutcome};
use crate::error::{AppError, AppResult};
use crate::models::inbox::{sort_inbox, summarize_conversation};
use crate::models::message::truncate_to_micros;
use crate::models::{
    ConversationKey, InboxEntry, Message, MessageId, MessageKind, NewMessage, ThreadCursor,
};

const MESSAGE_COLUMNS: &str = "id, conversation_key, sender_id, receiver_id, context_id, body, \
     kind, idempotency_key, created_at, read, read_at";

const INBOX_COLUMNS: &str = "owner_id, counterpart_id, context_id, conversation_key, \
     last_message_id, last_message_preview, last_message_at, last_sender_id, unread_count";

/// PostgreSQL-backed store. Every write runs in one transaction that first
/// takes the conversation's advisory lock.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_conversation(
        tx: &mut Transaction<'_, Postgres>,
        key: &ConversationKey,
    ) -> AppResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key.storage_key())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn find_by_idempotency_key(
        &self,
        sender_id: Uuid,
        idempotency_key: &str,
    ) -> AppResult<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE sender_id = $1 AND idempotency_key = $2"
        ))
        .bind(sender_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn upsert_inbox(
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        message: &Message,
        preview: &str,
        unread_delta: i64,
    ) -> AppResult<()> {
        let Some(counterpart_id) = message.conversation_key.counterpart_of(owner_id) else {
            return Ok(());
        };
        sqlx::query(
            r#"
            INSERT INTO inbox_entries (
                owner_id, conversation_key, counterpart_id, context_id,
                last_message_id, last_message_preview, last_message_at,
                last_sender_id, unread_count, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (owner_id, conversation_key) DO UPDATE SET
                last_message_id = EXCLUDED.last_message_id,
                last_message_preview = EXCLUDED.last_message_preview,
                last_message_at = EXCLUDED.last_message_at,
                last_sender_id = EXCLUDED.last_sender_id,
                unread_count = inbox_entries.unread_count + EXCLUDED.unread_count,
                updated_at = NOW()
            "#,
        )
        .bind(owner_id)
        .bind(message.conversation_key.storage_key())
        .bind(counterpart_id)
        .bind(&message.context_id)
        .bind(message.id.0)
        .bind(preview)
        .bind(message.created_at)
        .bind(message.sender_id)
        .bind(unread_delta)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn decrement_unread(
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        key: &ConversationKey,
        by: i64,
    ) -> AppResult<()> {
        if by == 0 {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE inbox_entries
            SET unread_count = GREATEST(unread_count - $3, 0), updated_at = NOW()
            WHERE owner_id = $1 AND conversation_key = $2
            "#,
        )
        .bind(owner_id)
        .bind(key.storage_key())
        .bind(by)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Insert the message and fold it into both inbox rows. `Ok(None)` means
    /// a concurrent append with the same idempotency key committed first.
    async fn insert_message(&self, draft: &NewMessage) -> AppResult<Option<Message>> {
        let key = &draft.conversation_key;
        let storage_key = key.storage_key();
        let mut tx = self.pool.begin().await?;
        Self::lock_conversation(&mut tx, key).await?;

        let previous: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM messages WHERE conversation_key = $1",
        )
        .bind(&storage_key)
        .fetch_one(&mut *tx)
        .await?;

        let now = truncate_to_micros(Utc::now());
        let created_at = previous.map_or(now, |prev| prev.max(now));

        let inserted = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            INSERT INTO messages (
                conversation_key, sender_id, receiver_id, context_id, body,
                kind, idempotency_key, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(&storage_key)
        .bind(draft.sender_id)
        .bind(draft.receiver_id)
        .bind(draft.context_id())
        .bind(&draft.body)
        .bind(draft.kind.as_str())
        .bind(&draft.idempotency_key)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let message = Message::try_from(row)?;

        Self::upsert_inbox(&mut tx, message.receiver_id, &message, &draft.preview, 1).await?;
        Self::upsert_inbox(&mut tx, message.sender_id, &message, &draft.preview, 0).await?;

        tx.commit().await?;
        Ok(Some(message))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl MessagingStore for PgStore {
    async fn append(&self, draft: NewMessage) -> AppResult<AppendOutcome> {
        if draft.sender_id == draft.receiver_id {
            return Err(AppError::Validation(
                "sender and receiver must differ".into(),
            ));
        }

        if let Some(token) = &draft.idempotency_key {
            if let Some(existing) = self.find_by_idempotency_key(draft.sender_id, token).await? {
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        if let Some(message) = self.insert_message(&draft).await? {
            return Ok(AppendOutcome::Created(message));
        }

        let token = draft.idempotency_key.as_deref().unwrap_or_default();
        debug!(sender_id = %draft.sender_id, "idempotency key raced, returning winner");
        self.find_by_idempotency_key(draft.sender_id, token)
            .await?
            .map(AppendOutcome::Duplicate)
            .ok_or_else(|| {
                AppError::StoreUnavailable("idempotent message vanished after conflict".into())
            })
    }

    async fn get(&self, id: MessageId) -> AppResult<Message> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        Message::try_from(row)
    }

    async fn list_by_conversation(
        &self,
        key: &ConversationKey,
        after: Option<ThreadCursor>,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let rows = match after {
            Some(cursor) => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE conversation_key = $1 AND (created_at, id) > ($2, $3)
                    ORDER BY created_at ASC, id ASC
                    LIMIT $4
                    "#
                ))
                .bind(key.storage_key())
                .bind(cursor.created_at)
                .bind(cursor.id.0)
                .bind(to_limit(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MessageRow>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE conversation_key = $1
                    ORDER BY created_at ASC, id ASC
                    LIMIT $2
                    "#
                ))
                .bind(key.storage_key())
                .bind(to_limit(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn mark_read(&self, id: MessageId, acting_user_id: Uuid) -> AppResult<ReadOutcome> {
        let message = self.get(id).await?;
        if message.receiver_id != acting_user_id {
            return Err(AppError::Forbidden(
                "only the receiver can mark a message read".into(),
            ));
        }
        if message.read {
            return Ok(ReadOutcome::AlreadyRead);
        }

        let key = message.conversation_key;
        let mut tx = self.pool.begin().await?;
        Self::lock_conversation(&mut tx, &key).await?;

        let updated = sqlx::query(
            "UPDATE messages SET read = TRUE, read_at = $2 WHERE id = $1 AND read = FALSE",
        )
        .bind(id.0)
        .bind(truncate_to_micros(Utc::now()))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(ReadOutcome::AlreadyRead);
        }

        Self::decrement_unread(&mut tx, acting_user_id, &key, 1).await?;
        tx.commit().await?;
        Ok(ReadOutcome::Marked(key))
    }

    async fn unread_ids(
        &self,
        key: &ConversationKey,
        owner_id: Uuid,
    ) -> AppResult<Vec<MessageId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM messages
            WHERE conversation_key = $1 AND receiver_id = $2 AND read = FALSE
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(key.storage_key())
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(MessageId).collect())
    }

    async fn mark_many_read(
        &self,
        key: &ConversationKey,
        owner_id: Uuid,
        ids: &[MessageId],
    ) -> AppResult<Vec<MessageId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.0).collect();

        let mut tx = self.pool.begin().await?;
        Self::lock_conversation(&mut tx, key).await?;

        let mut marked: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE messages SET read = TRUE, read_at = $4
            WHERE conversation_key = $1 AND receiver_id = $2
              AND id = ANY($3) AND read = FALSE
            RETURNING id
            "#,
        )
        .bind(key.storage_key())
        .bind(owner_id)
        .bind(&raw_ids)
        .bind(truncate_to_micros(Utc::now()))
        .fetch_all(&mut *tx)
        .await?;

        let count = i64::try_from(marked.len()).unwrap_or(i64::MAX);
        Self::decrement_unread(&mut tx, owner_id, key, count).await?;
        tx.commit().await?;
        marked.sort_unstable();
        Ok(marked.into_iter().map(MessageId).collect())
    }

    async fn list_inbox(&self, owner_id: Uuid) -> AppResult<Vec<InboxEntry>> {
        let rows = sqlx::query_as::<_, InboxRow>(&format!(
            "SELECT {INBOX_COLUMNS} FROM inbox_entries WHERE owner_id = $1"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InboxEntry::try_from).collect()
    }

    async fn messages_involving(&self, owner_id: Uuid) -> AppResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE sender_id = $1 OR receiver_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn repair_inbox(
        &self,
        owner_id: Uuid,
        preview_chars: usize,
    ) -> AppResult<Vec<InboxEntry>> {
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT conversation_key FROM messages
            WHERE sender_id = $1 OR receiver_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut repaired = Vec::with_capacity(keys.len());
        for raw_key in &keys {
            let key = ConversationKey::parse_storage_key(raw_key)?;
            let mut tx = self.pool.begin().await?;
            Self::lock_conversation(&mut tx, &key).await?;

            let rows = sqlx::query_as::<_, MessageRow>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_key = $1"
            ))
            .bind(raw_key)
            .fetch_all(&mut *tx)
            .await?;
            let log = rows
                .into_iter()
                .map(Message::try_from)
                .collect::<AppResult<Vec<_>>>()?;

            let Some(entry) = summarize_conversation(owner_id, &key, &log, preview_chars) else {
                tx.rollback().await?;
                continue;
            };

            sqlx::query(
                r#"
                INSERT INTO inbox_entries (
                    owner_id, conversation_key, counterpart_id, context_id,
                    last_message_id, last_message_preview, last_message_at,
                    last_sender_id, unread_count, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
                ON CONFLICT (owner_id, conversation_key) DO UPDATE SET
                    last_message_id = EXCLUDED.last_message_id,
                    last_message_preview = EXCLUDED.last_message_preview,
                    last_message_at = EXCLUDED.last_message_at,
                    last_sender_id = EXCLUDED.last_sender_id,
                    unread_count = EXCLUDED.unread_count,
                    updated_at = NOW()
                "#,
            )
            .bind(owner_id)
            .bind(raw_key)
            .bind(entry.counterpart_id)
            .bind(&entry.context_id)
            .bind(entry.last_message_id.0)
            .bind(&entry.last_message_preview)
            .bind(entry.last_message_at)
            .bind(entry.last_sender_id)
            .bind(i64::try_from(entry.unread_count).unwrap_or(i64::MAX))
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            repaired.push(entry);
        }

        sqlx::query(
            r#"
            DELETE FROM inbox_entries
            WHERE owner_id = $1
              AND NOT EXISTS (
                  SELECT 1 FROM messages m
                  WHERE m.conversation_key = inbox_entries.conversation_key
              )
            "#,
        )
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        sort_inbox(&mut repaired);
        Ok(repaired)
    }
}

// Database row representations
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation_key: String,
    sender_id: Uuid,
    receiver_id: Uuid,
    context_id: Option<String>,
    body: String,
    kind: String,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    read: bool,
    read_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId(row.id),
            conversation_key: ConversationKey::parse_storage_key(&row.conversation_key)?,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            context_id: row.context_id,
            body: row.body,
            kind: MessageKind::from_str(&row.kind),
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            read: row.read,
            read_at: row.read_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InboxRow {
    owner_id: Uuid,
    counterpart_id: Uuid,
    context_id: Option<String>,
    conversation_key: String,
    last_message_id: i64,
    last_message_preview: String,
    last_message_at: DateTime<Utc>,
    last_sender_id: Uuid,
    unread_count: i64,
}

impl TryFrom<InboxRow> for InboxEntry {
    type Error = AppError;

    fn try_from(row: InboxRow) -> Result<Self, Self::Error> {
        Ok(InboxEntry {
            owner_id: row.owner_id,
            counterpart_id: row.counterpart_id,
            context_id: row.context_id,
            conversation_key: ConversationKey::parse_storage_key(&row.conversation_key)?,
            last_message_id: MessageId(row.last_message_id),
            last_message_preview: row.last_message_preview,
            last_message_at: row.last_message_at,
            last_sender_id: row.last_sender_id,
            unread_count: u64::try_from(row.unread_count).unwrap_or(0),
        })
    }
}
