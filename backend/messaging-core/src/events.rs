//! Event feed: fan-out of committed messaging changes.
//!
//! Transports (web-socket push, mobile notifications) subscribe here; the core
//! never waits for them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ConversationKey, Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagingEvent {
    MessageSent {
        message: Message,
    },
    MessagesRead {
        conversation_key: ConversationKey,
        reader_id: Uuid,
        message_ids: Vec<MessageId>,
    },
}

/// Broadcast channel of [`MessagingEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MessagingEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MessagingEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: MessagingEvent) {
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(receivers, "messaging event published"),
            Err(_) => tracing::trace!("messaging event dropped, no subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
