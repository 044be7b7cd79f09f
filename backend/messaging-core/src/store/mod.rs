//! # Message Store
//!
//! Append-only message log plus the per-owner inbox rows derived from it.
//! The log is the source of truth; inbox rows are a cache kept in step by the
//! same atomic unit that appends or marks messages read.
//!
//! Two implementations:
//! - [`InMemoryStore`]: one mutex per conversation, atomic unread counters.
//! - [`PgStore`]: one transaction per write, serialized per conversation with
//!   a transaction-scoped advisory lock.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ConversationKey, InboxEntry, Message, MessageId, NewMessage, ThreadCursor};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Result of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Message persisted and both inbox rows updated.
    Created(Message),
    /// `(sender_id, idempotency_key)` was already used; nothing changed.
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            AppendOutcome::Created(m) | AppendOutcome::Duplicate(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            AppendOutcome::Created(m) | AppendOutcome::Duplicate(m) => m,
        }
    }
}

/// Result of a single mark-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Marked(ConversationKey),
    AlreadyRead,
}

#[async_trait]
pub trait MessagingStore: Send + Sync {
    /// Persist `draft` and update the receiver's inbox row (unread + 1, last
    /// message) and the sender's row (last message only) in one atomic unit.
    async fn append(&self, draft: NewMessage) -> AppResult<AppendOutcome>;

    async fn get(&self, id: MessageId) -> AppResult<Message>;

    /// Messages of `key` strictly after `after`, ascending by
    /// `(created_at, id)`, at most `limit`.
    async fn list_by_conversation(
        &self,
        key: &ConversationKey,
        after: Option<ThreadCursor>,
        limit: usize,
    ) -> AppResult<Vec<Message>>;

    /// Flip `read` for the receiver and decrement their unread counter
    /// (floored at zero). `Forbidden` for anyone but the receiver.
    async fn mark_read(&self, id: MessageId, acting_user_id: Uuid) -> AppResult<ReadOutcome>;

    /// Ids of messages in `key` addressed to `owner_id` that are unread now.
    async fn unread_ids(&self, key: &ConversationKey, owner_id: Uuid)
        -> AppResult<Vec<MessageId>>;

    /// Mark exactly `ids` read (those still unread and addressed to
    /// `owner_id`). Returns the ids this call changed, ascending.
    async fn mark_many_read(
        &self,
        key: &ConversationKey,
        owner_id: Uuid,
        ids: &[MessageId],
    ) -> AppResult<Vec<MessageId>>;

    /// Live inbox rows for `owner_id`, in no particular order.
    async fn list_inbox(&self, owner_id: Uuid) -> AppResult<Vec<InboxEntry>>;

    /// Every message of every conversation `owner_id` takes part in.
    async fn messages_involving(&self, owner_id: Uuid) -> AppResult<Vec<Message>>;

    /// Recompute the owner's inbox rows from the log and overwrite them.
    async fn repair_inbox(&self, owner_id: Uuid, preview_chars: usize)
        -> AppResult<Vec<InboxEntry>>;
}
