use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MessagingLimits;
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, MessagingEvent};
use crate::metrics;
use crate::models::inbox::preview;
use crate::models::{ConversationKey, Message, MessageKind, NewMessage, SYSTEM_USER_ID};
use crate::store::{AppendOutcome, MessagingStore};

pub const MAX_IDEMPOTENCY_KEY_CHARS: usize = 255;

/// A send request as it arrives from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Send pipeline: validate, resolve the conversation, append atomically with
/// both inbox updates, then announce.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessagingStore>,
    events: EventBus,
    limits: MessagingLimits,
}

impl MessageService {
    pub fn new(store: Arc<dyn MessagingStore>, events: EventBus, limits: MessagingLimits) -> Self {
        Self {
            store,
            events,
            limits,
        }
    }

    pub async fn send(&self, request: SendMessage) -> AppResult<Message> {
        if let Err(err) = self.validate_participants(request.sender_id, request.receiver_id) {
            metrics::record_send_rejected("participants");
            return Err(err);
        }
        self.deliver(
            request.sender_id,
            request.receiver_id,
            request.context_id.as_deref(),
            request.body,
            MessageKind::User,
            request.idempotency_key,
        )
        .await
    }

    /// Send on behalf of the platform. Only the notifier calls this.
    pub(crate) async fn send_system(
        &self,
        recipient_id: Uuid,
        context_id: Option<&str>,
        body: String,
    ) -> AppResult<Message> {
        if recipient_id == SYSTEM_USER_ID {
            metrics::record_send_rejected("participants");
            return Err(AppError::Validation(
                "system notifications need a human recipient".into(),
            ));
        }
        self.deliver(
            SYSTEM_USER_ID,
            recipient_id,
            context_id,
            body,
            MessageKind::System,
            None,
        )
        .await
    }

    fn validate_participants(&self, sender_id: Uuid, receiver_id: Uuid) -> AppResult<()> {
        if sender_id == receiver_id {
            return Err(AppError::Validation(
                "sender and receiver must differ".into(),
            ));
        }
        if sender_id == SYSTEM_USER_ID || receiver_id == SYSTEM_USER_ID {
            return Err(AppError::Validation(
                "the system identity is reserved".into(),
            ));
        }
        Ok(())
    }

    fn validate_body(&self, body: &str) -> AppResult<()> {
        if body.trim().is_empty() {
            return Err(AppError::Validation("message body is empty".into()));
        }
        let chars = body.chars().count();
        if chars > self.limits.max_body_chars {
            return Err(AppError::Validation(format!(
                "message body too long ({chars} > {} chars)",
                self.limits.max_body_chars
            )));
        }
        Ok(())
    }

    fn validate_idempotency_key(key: Option<String>) -> AppResult<Option<String>> {
        match key {
            None => Ok(None),
            Some(raw) => {
                let trimmed = raw.trim();
                let chars = trimmed.chars().count();
                if chars == 0 || chars > MAX_IDEMPOTENCY_KEY_CHARS {
                    return Err(AppError::Validation(format!(
                        "idempotency_key must be 1..={MAX_IDEMPOTENCY_KEY_CHARS} chars"
                    )));
                }
                Ok(Some(trimmed.to_string()))
            }
        }
    }

    async fn deliver(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        context_id: Option<&str>,
        body: String,
        kind: MessageKind,
        idempotency_key: Option<String>,
    ) -> AppResult<Message> {
        if let Err(err) = self.validate_body(&body) {
            metrics::record_send_rejected("body");
            return Err(err);
        }
        let idempotency_key = Self::validate_idempotency_key(idempotency_key).map_err(|err| {
            metrics::record_send_rejected("idempotency_key");
            err
        })?;
        let conversation_key = ConversationKey::resolve(sender_id, receiver_id, context_id)
            .map_err(|err| {
                metrics::record_send_rejected("context");
                match err {
                    AppError::InvalidArgument(detail) => AppError::Validation(detail),
                    other => other,
                }
            })?;

        let draft = NewMessage {
            preview: preview(&body, self.limits.inbox_preview_chars),
            conversation_key,
            sender_id,
            receiver_id,
            body,
            kind,
            idempotency_key,
        };

        match self.store.append(draft).await {
            Ok(AppendOutcome::Created(message)) => {
                info!(
                    message_id = %message.id,
                    conversation_key = %message.conversation_key,
                    kind = kind.as_str(),
                    "message sent"
                );
                metrics::record_message_sent(kind);
                self.events.publish(MessagingEvent::MessageSent {
                    message: message.clone(),
                });
                Ok(message)
            }
            Ok(AppendOutcome::Duplicate(message)) => {
                info!(
                    message_id = %message.id,
                    sender_id = %sender_id,
                    "idempotent send replayed"
                );
                metrics::record_idempotent_replay();
                Ok(message)
            }
            Err(err) => {
                warn!(error = %err, sender_id = %sender_id, "message append failed");
                Err(err)
            }
        }
    }
}
