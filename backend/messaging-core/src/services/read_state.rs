use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::events::{EventBus, MessagingEvent};
use crate::metrics;
use crate::models::{ConversationKey, MessageId};
use crate::store::{MessagingStore, ReadOutcome};

/// Read-state tracker. Only the receiver of a message can change its state.
#[derive(Clone)]
pub struct ReadStateService {
    store: Arc<dyn MessagingStore>,
    events: EventBus,
}

impl ReadStateService {
    pub fn new(store: Arc<dyn MessagingStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Mark one message read. Repeating the call is a no-op.
    pub async fn mark_read(&self, message_id: MessageId, acting_user_id: Uuid) -> AppResult<()> {
        match self.store.mark_read(message_id, acting_user_id).await? {
            ReadOutcome::Marked(conversation_key) => {
                debug!(
                    message_id = %message_id,
                    reader_id = %acting_user_id,
                    "message marked read"
                );
                metrics::record_messages_read(1);
                self.events.publish(MessagingEvent::MessagesRead {
                    conversation_key,
                    reader_id: acting_user_id,
                    message_ids: vec![message_id],
                });
            }
            ReadOutcome::AlreadyRead => {
                debug!(message_id = %message_id, "message already read");
            }
        }
        Ok(())
    }

    /// Mark every message addressed to `acting_user_id` in the conversation
    /// read, as of this call. Messages appended afterwards stay unread.
    /// Returns how many messages changed state.
    pub async fn mark_all_read_in_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        context_id: Option<&str>,
        acting_user_id: Uuid,
    ) -> AppResult<u64> {
        let key = ConversationKey::resolve(user_a, user_b, context_id).map_err(|err| match err {
            AppError::InvalidArgument(detail) => AppError::Validation(detail),
            other => other,
        })?;
        if !key.involves(acting_user_id) {
            return Err(AppError::Forbidden(
                "only a participant can mark a conversation read".into(),
            ));
        }

        let snapshot = self.store.unread_ids(&key, acting_user_id).await?;
        if snapshot.is_empty() {
            return Ok(0);
        }

        let changed = self
            .store
            .mark_many_read(&key, acting_user_id, &snapshot)
            .await?;
        let marked = changed.len() as u64;

        if marked > 0 {
            info!(
                conversation_key = %key,
                reader_id = %acting_user_id,
                marked,
                "conversation marked read"
            );
            metrics::record_messages_read(marked);
            self.events.publish(MessagingEvent::MessagesRead {
                conversation_key: key,
                reader_id: acting_user_id,
                message_ids: changed,
            });
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingLimits;
    use crate::models::{InboxEntry, Message, NewMessage, ThreadCursor};
    use crate::services::message_service::{MessageService, SendMessage};
    use crate::store::{AppendOutcome, InMemoryStore};

    struct Fixture {
        store: Arc<InMemoryStore>,
        messages: MessageService,
        reads: ReadStateService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let events = EventBus::new(16);
        Fixture {
            messages: MessageService::new(store.clone(), events.clone(), MessagingLimits::default()),
            reads: ReadStateService::new(store.clone(), events),
            store,
        }
    }

    fn send(sender: Uuid, receiver: Uuid, body: &str) -> SendMessage {
        SendMessage {
            sender_id: sender,
            receiver_id: receiver,
            body: body.into(),
            context_id: None,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let m = f.messages.send(send(a, b, "one")).await.unwrap();
        f.messages.send(send(a, b, "two")).await.unwrap();

        f.reads.mark_read(m.id, b).await.unwrap();
        f.reads.mark_read(m.id, b).await.unwrap();

        let inbox = f.store.list_inbox(b).await.unwrap();
        assert_eq!(inbox[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_sender_cannot_mark_read() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let m = f.messages.send(send(a, b, "one")).await.unwrap();
        assert!(matches!(
            f.reads.mark_read(m.id, a).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            f.reads.mark_read(MessageId(i64::MAX), b).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_all_only_touches_acting_users_messages() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        f.messages.send(send(a, b, "1")).await.unwrap();
        f.messages.send(send(a, b, "2")).await.unwrap();
        f.messages.send(send(b, a, "3")).await.unwrap();

        let marked = f
            .reads
            .mark_all_read_in_conversation(a, b, None, b)
            .await
            .unwrap();
        assert_eq!(marked, 2);
        assert_eq!(f.store.list_inbox(b).await.unwrap()[0].unread_count, 0);
        assert_eq!(f.store.list_inbox(a).await.unwrap()[0].unread_count, 1);

        let again = f
            .reads
            .mark_all_read_in_conversation(b, a, None, b)
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    /// Marks the first snapshot id read between the snapshot and the bulk
    /// update, the way a concurrent single `mark_read` would.
    struct RacingReadStore {
        inner: Arc<InMemoryStore>,
    }

    #[async_trait::async_trait]
    impl MessagingStore for RacingReadStore {
        async fn append(&self, draft: NewMessage) -> AppResult<AppendOutcome> {
            self.inner.append(draft).await
        }

        async fn get(&self, id: MessageId) -> AppResult<Message> {
            self.inner.get(id).await
        }

        async fn list_by_conversation(
            &self,
            key: &ConversationKey,
            after: Option<ThreadCursor>,
            limit: usize,
        ) -> AppResult<Vec<Message>> {
            self.inner.list_by_conversation(key, after, limit).await
        }

        async fn mark_read(&self, id: MessageId, acting_user_id: Uuid) -> AppResult<ReadOutcome> {
            self.inner.mark_read(id, acting_user_id).await
        }

        async fn unread_ids(
            &self,
            key: &ConversationKey,
            owner_id: Uuid,
        ) -> AppResult<Vec<MessageId>> {
            let ids = self.inner.unread_ids(key, owner_id).await?;
            if let Some(first) = ids.first() {
                self.inner.mark_read(*first, owner_id).await?;
            }
            Ok(ids)
        }

        async fn mark_many_read(
            &self,
            key: &ConversationKey,
            owner_id: Uuid,
            ids: &[MessageId],
        ) -> AppResult<Vec<MessageId>> {
            self.inner.mark_many_read(key, owner_id, ids).await
        }

        async fn list_inbox(&self, owner_id: Uuid) -> AppResult<Vec<InboxEntry>> {
            self.inner.list_inbox(owner_id).await
        }

        async fn messages_involving(&self, owner_id: Uuid) -> AppResult<Vec<Message>> {
            self.inner.messages_involving(owner_id).await
        }

        async fn repair_inbox(
            &self,
            owner_id: Uuid,
            preview_chars: usize,
        ) -> AppResult<Vec<InboxEntry>> {
            self.inner.repair_inbox(owner_id, preview_chars).await
        }
    }

    #[tokio::test]
    async fn test_mark_all_event_lists_only_changed_ids() {
        let inner = Arc::new(InMemoryStore::new());
        let store: Arc<dyn MessagingStore> = Arc::new(RacingReadStore {
            inner: inner.clone(),
        });
        let events = EventBus::new(16);
        let messages = MessageService::new(store.clone(), events.clone(), MessagingLimits::default());
        let reads = ReadStateService::new(store, events.clone());

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let first = messages.send(send(a, b, "1")).await.unwrap();
        let second = messages.send(send(a, b, "2")).await.unwrap();
        let mut feed = events.subscribe();

        let marked = reads
            .mark_all_read_in_conversation(a, b, None, b)
            .await
            .unwrap();
        assert_eq!(marked, 1);
        assert!(inner.get(first.id).await.unwrap().read);

        match feed.recv().await.unwrap() {
            MessagingEvent::MessagesRead { message_ids, .. } => {
                assert_eq!(message_ids, vec![second.id]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(inner.list_inbox(b).await.unwrap()[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_mark_all_requires_participant() {
        let f = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        f.messages.send(send(a, b, "1")).await.unwrap();
        assert!(matches!(
            f.reads
                .mark_all_read_in_conversation(a, b, None, Uuid::new_v4())
                .await,
            Err(AppError::Forbidden(_))
        ));
    }
}
