use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;

/// Sender identity used by the system notifier. Never a human account.
pub const SYSTEM_USER_ID: Uuid = Uuid::nil();

pub const MAX_CONTEXT_ID_CHARS: usize = 128;

/// Canonical identifier of a two-party conversation, optionally scoped to a
/// posting. Participants are stored ordered (`low < high`), so both sides
/// resolve the same key. The derived `Ord` is the inbox tiebreaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey {
    low: Uuid,
    high: Uuid,
    context_id: Option<String>,
}

impl ConversationKey {
    /// Resolve the conversation between `user_a` and `user_b` under `context_id`.
    /// Argument order does not matter.
    pub fn resolve(
        user_a: Uuid,
        user_b: Uuid,
        context_id: Option<&str>,
    ) -> Result<Self, AppError> {
        if user_a == user_b {
            return Err(AppError::InvalidArgument(
                "a conversation needs two distinct participants".into(),
            ));
        }
        let context_id = normalize_context(context_id)?;
        let (low, high) = if user_a < user_b {
            (user_a, user_b)
        } else {
            (user_b, user_a)
        };
        Ok(Self {
            low,
            high,
            context_id,
        })
    }

    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }

    pub fn counterpart_of(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.low {
            Some(self.high)
        } else if user_id == self.high {
            Some(self.low)
        } else {
            None
        }
    }

    /// Persisted form: `"{low}:{high}"` or `"{low}:{high}:{context}"`.
    pub fn storage_key(&self) -> String {
        match &self.context_id {
            Some(ctx) => format!("{}:{}:{}", self.low, self.high, ctx),
            None => format!("{}:{}", self.low, self.high),
        }
    }

    pub fn parse_storage_key(raw: &str) -> Result<Self, AppError> {
        let mut parts = raw.splitn(3, ':');
        let parse = |part: Option<&str>| {
            part.and_then(|p| Uuid::parse_str(p).ok()).ok_or_else(|| {
                AppError::InvalidArgument(format!("malformed conversation key: {raw}"))
            })
        };
        let a = parse(parts.next())?;
        let b = parse(parts.next())?;
        Self::resolve(a, b, parts.next())
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

fn normalize_context(context_id: Option<&str>) -> Result<Option<String>, AppError> {
    match context_id {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(AppError::InvalidArgument(
                    "context_id must not be blank".into(),
                ));
            }
            if trimmed.chars().count() > MAX_CONTEXT_ID_CHARS {
                return Err(AppError::InvalidArgument(format!(
                    "context_id too long (max {MAX_CONTEXT_ID_CHARS})"
                )));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_order_independent() {
        for _ in 0..50 {
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            for ctx in [None, Some("job#42")] {
                assert_eq!(
                    ConversationKey::resolve(a, b, ctx).unwrap(),
                    ConversationKey::resolve(b, a, ctx).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_context_scopes_conversations() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let plain = ConversationKey::resolve(a, b, None).unwrap();
        let job = ConversationKey::resolve(a, b, Some("job#42")).unwrap();
        let other_job = ConversationKey::resolve(a, b, Some("job#43")).unwrap();
        assert_ne!(plain, job);
        assert_ne!(job, other_job);
        assert_eq!(
            job,
            ConversationKey::resolve(b, a, Some("  job#42 ")).unwrap()
        );
    }

    #[test]
    fn test_self_conversation_rejected() {
        let a = Uuid::new_v4();
        let err = ConversationKey::resolve(a, a, None).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn test_blank_or_oversized_context_rejected() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(ConversationKey::resolve(a, b, Some("   ")).is_err());
        let long = "x".repeat(MAX_CONTEXT_ID_CHARS + 1);
        assert!(ConversationKey::resolve(a, b, Some(&long)).is_err());
    }

    #[test]
    fn test_counterpart_and_storage_key() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let key = ConversationKey::resolve(a, b, Some("job:7")).unwrap();
        assert_eq!(key.counterpart_of(a), Some(b));
        assert_eq!(key.counterpart_of(b), Some(a));
        assert_eq!(key.counterpart_of(Uuid::new_v4()), None);

        let parsed = ConversationKey::parse_storage_key(&key.storage_key()).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.context_id(), Some("job:7"));

        let plain = ConversationKey::resolve(a, b, None).unwrap();
        assert_eq!(
            ConversationKey::parse_storage_key(&plain.storage_key()).unwrap(),
            plain
        );
    }
}
