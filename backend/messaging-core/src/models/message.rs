use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::conversation::ConversationKey;

/// Store-assigned, monotonically increasing message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::System => "system",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(value: &str) -> Self {
        match value {
            "system" => MessageKind::System,
            _ => MessageKind::User,
        }
    }
}

/// Persisted message. Immutable apart from `read`/`read_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub context_id: Option<String>,
    pub body: String,
    pub kind: MessageKind,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Position of the message inside its conversation.
    pub fn sort_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }

    pub fn is_unread_for(&self, user_id: Uuid) -> bool {
        self.receiver_id == user_id && !self.read
    }
}

/// A validated message waiting to be appended. The store assigns `id` and
/// `created_at`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    pub kind: MessageKind,
    pub idempotency_key: Option<String>,
    /// Inbox preview computed by the pipeline from `body`.
    pub preview: String,
}

impl NewMessage {
    pub fn context_id(&self) -> Option<String> {
        self.conversation_key.context_id().map(str::to_string)
    }
}

/// Drop sub-microsecond precision so in-memory timestamps match what
/// Postgres stores and what cursors encode.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}
