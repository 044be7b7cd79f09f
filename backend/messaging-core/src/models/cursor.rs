use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use super::message::{Message, MessageId};
use crate::error::AppError;

/// Position in a thread. Pages return messages strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadCursor {
    pub created_at: DateTime<Utc>,
    pub id: MessageId,
}

impl ThreadCursor {
    pub fn after(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id,
        }
    }

    /// Opaque wire form: URL-safe base64 of `"{micros}:{id}"`.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.created_at.timestamp_micros(), self.id.0))
    }

    pub fn decode(raw: &str) -> Result<Self, AppError> {
        let invalid = || AppError::Validation("invalid thread cursor".into());

        let bytes = URL_SAFE_NO_PAD.decode(raw.trim()).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (micros, id) = text.split_once(':').ok_or_else(invalid)?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let id: i64 = id.parse().map_err(|_| invalid())?;
        let created_at = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(invalid)?;

        Ok(Self {
            created_at,
            id: MessageId(id),
        })
    }

    /// True when `message` sorts strictly after this cursor.
    pub fn precedes(&self, message: &Message) -> bool {
        (self.created_at, self.id) < message.sort_key()
    }
}
