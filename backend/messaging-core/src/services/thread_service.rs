use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::MessagingLimits;
use crate::error::{AppError, AppResult};
use crate::models::{ConversationKey, Message, ThreadCursor};
use crate::store::MessagingStore;

/// One page of a thread. `next_cursor == None` means the thread is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadPage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

/// Where the next stream fetch starts.
enum StreamPosition {
    Start,
    After(ThreadCursor),
    Done,
}

#[derive(Clone)]
pub struct ThreadService {
    store: Arc<dyn MessagingStore>,
    limits: MessagingLimits,
}

impl ThreadService {
    pub fn new(store: Arc<dyn MessagingStore>, limits: MessagingLimits) -> Self {
        Self { store, limits }
    }

    fn resolve(user_a: Uuid, user_b: Uuid, context_id: Option<&str>) -> AppResult<ConversationKey> {
        ConversationKey::resolve(user_a, user_b, context_id).map_err(|err| match err {
            AppError::InvalidArgument(detail) => AppError::Validation(detail),
            other => other,
        })
    }

    fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.limits.thread_default_page_size)
            .clamp(1, self.limits.thread_max_page_size)
    }

    async fn fetch_page(
        &self,
        key: &ConversationKey,
        after: Option<ThreadCursor>,
        page_size: usize,
    ) -> AppResult<(Vec<Message>, Option<ThreadCursor>)> {
        // One extra row tells us whether another page exists.
        let mut messages = self
            .store
            .list_by_conversation(key, after, page_size + 1)
            .await?;
        let has_more = messages.len() > page_size;
        messages.truncate(page_size);

        let next = if has_more {
            messages.last().map(ThreadCursor::after)
        } else {
            None
        };
        Ok((messages, next))
    }

    /// Oldest-first page of the conversation between `user_a` and `user_b`.
    pub async fn get_thread(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        context_id: Option<&str>,
        cursor: Option<&str>,
        page_size: Option<usize>,
    ) -> AppResult<ThreadPage> {
        let key = Self::resolve(user_a, user_b, context_id)?;
        let after = cursor.map(ThreadCursor::decode).transpose()?;
        let (messages, next) = self.fetch_page(&key, after, self.page_size(page_size)).await?;

        Ok(ThreadPage {
            messages,
            next_cursor: next.map(|c| c.encode()),
        })
    }

    /// The whole thread as a lazy stream, fetched one page at a time.
    /// Stops after the first error.
    pub fn stream_thread(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        context_id: Option<&str>,
        page_size: Option<usize>,
    ) -> AppResult<impl Stream<Item = AppResult<Message>> + Send + 'static> {
        let key = Self::resolve(user_a, user_b, context_id)?;
        let page_size = self.page_size(page_size);
        let service = self.clone();

        let pages = stream::unfold(StreamPosition::Start, move |position| {
            let service = service.clone();
            let key = key.clone();
            async move {
                let after = match position {
                    StreamPosition::Start => None,
                    StreamPosition::After(cursor) => Some(cursor),
                    StreamPosition::Done => return None,
                };
                match service.fetch_page(&key, after, page_size).await {
                    Ok((messages, Some(next))) => {
                        Some((Ok(messages), StreamPosition::After(next)))
                    }
                    Ok((messages, None)) => Some((Ok(messages), StreamPosition::Done)),
                    Err(err) => Some((Err(err), StreamPosition::Done)),
                }
            }
        });

        Ok(pages.flat_map(|page| {
            let items: Vec<AppResult<Message>> = match page {
                Ok(messages) => messages.into_iter().map(Ok).collect(),
                Err(err) => vec![Err(err)],
            };
            stream::iter(items)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::services::message_service::{MessageService, SendMessage};
    use crate::store::InMemoryStore;
    use futures::TryStreamExt;
    use std::collections::HashSet;

    async fn seeded(count: usize) -> (ThreadService, Uuid, Uuid) {
        let store: Arc<dyn MessagingStore> = Arc::new(InMemoryStore::new());
        let limits = MessagingLimits::default();
        let messages = MessageService::new(store.clone(), EventBus::new(16), limits.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for i in 0..count {
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            messages
                .send(SendMessage {
                    sender_id: from,
                    receiver_id: to,
                    body: format!("message {i}"),
                    context_id: None,
                    idempotency_key: None,
                })
                .await
                .unwrap();
        }
        (ThreadService::new(store, limits), a, b)
    }

    #[tokio::test]
    async fn test_pages_cover_thread_without_duplicates() {
        let (threads, a, b) = seeded(23).await;
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = threads
                .get_thread(a, b, None, cursor.as_deref(), Some(5))
                .await
                .unwrap();
            assert!(page.messages.len() <= 5);
            for m in &page.messages {
                assert!(seen.insert(m.id), "duplicate {}", m.id);
            }
            all.extend(page.messages);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(all.len(), 23);
        for pair in all.windows(2) {
            assert!(pair[0].sort_key() < pair[1].sort_key());
        }
    }

    #[tokio::test]
    async fn test_exact_page_has_no_next_cursor() {
        let (threads, a, b) = seeded(10).await;
        let page = threads.get_thread(b, a, None, None, Some(10)).await.unwrap();
        assert_eq!(page.messages.len(), 10);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_page_size_is_clamped() {
        let (threads, a, b) = seeded(3).await;
        let page = threads.get_thread(a, b, None, None, Some(0)).await.unwrap();
        assert_eq!(page.messages.len(), 1);
        assert!(page.next_cursor.is_some());

        assert_eq!(threads.page_size(Some(10_000)), 200);
        assert_eq!(threads.page_size(None), 50);
    }

    #[tokio::test]
    async fn test_bad_cursor_is_validation_error() {
        let (threads, a, b) = seeded(1).await;
        assert!(matches!(
            threads.get_thread(a, b, None, Some("%%%"), None).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_empty() {
        let (threads, a, _) = seeded(2).await;
        let page = threads
            .get_thread(a, Uuid::new_v4(), Some("job#1"), None, None)
            .await
            .unwrap();
        assert!(page.messages.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_stream_yields_whole_thread_in_order() {
        let (threads, a, b) = seeded(12).await;
        let streamed: Vec<Message> = threads
            .stream_thread(a, b, None, Some(5))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(streamed.len(), 12);
        assert_eq!(streamed[0].body, "message 0");
        assert_eq!(streamed[11].body, "message 11");
    }
}
