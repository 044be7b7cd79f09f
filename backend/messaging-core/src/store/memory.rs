use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::{AppendOutcome, MessagingStore, ReadOutcome};
use crate::error::{AppError, AppResult};
use crate::models::inbox::{sort_inbox, summarize_conversation};
use crate::models::message::truncate_to_micros;
use crate::models::{ConversationKey, InboxEntry, Message, MessageId, NewMessage, ThreadCursor};

/// Messages of one conversation in `(created_at, id)` order. Ids only grow
/// while the conversation mutex is held, so the log is also sorted by id.
#[derive(Default)]
struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.binary_search_by_key(&id, |m| m.id).ok()
    }
}

/// Live inbox row. `entry.unread_count` is stale; `unread` is authoritative.
struct InboxRow {
    entry: RwLock<InboxEntry>,
    unread: AtomicU64,
}

impl InboxRow {
    fn snapshot(&self) -> InboxEntry {
        let mut entry = self.entry.read().clone();
        entry.unread_count = self.unread.load(Ordering::Acquire);
        entry
    }

    fn decrement(&self, by: u64) {
        let _ = self
            .unread
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(by))
            });
    }
}

type OwnerInbox = Arc<RwLock<HashMap<ConversationKey, Arc<InboxRow>>>>;

/// Process-local store.
///
/// Lock order: idempotency shard, then conversation mutex, then an owner's
/// inbox map. Nothing awaits while any of them is held.
pub struct InMemoryStore {
    next_id: AtomicI64,
    conversations: DashMap<ConversationKey, Arc<Mutex<ConversationLog>>>,
    message_index: DashMap<MessageId, ConversationKey>,
    participants: DashMap<Uuid, HashSet<ConversationKey>>,
    idempotency: DashMap<(Uuid, String), MessageId>,
    inboxes: DashMap<Uuid, OwnerInbox>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            conversations: DashMap::new(),
            message_index: DashMap::new(),
            participants: DashMap::new(),
            idempotency: DashMap::new(),
            inboxes: DashMap::new(),
        }
    }

    fn log_for(&self, key: &ConversationKey) -> Arc<Mutex<ConversationLog>> {
        self.conversations.entry(key.clone()).or_default().clone()
    }

    fn existing_log(&self, key: &ConversationKey) -> Option<Arc<Mutex<ConversationLog>>> {
        self.conversations.get(key).map(|log| log.clone())
    }

    fn inbox_of(&self, owner_id: Uuid) -> OwnerInbox {
        self.inboxes.entry(owner_id).or_default().clone()
    }

    fn locate(&self, id: MessageId) -> AppResult<ConversationKey> {
        self.message_index
            .get(&id)
            .map(|key| key.clone())
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))
    }

    fn fetch(&self, id: MessageId) -> AppResult<Message> {
        let key = self.locate(id)?;
        let log = self
            .existing_log(&key)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        let log = log.lock();
        log.position(id)
            .map(|pos| log.messages[pos].clone())
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))
    }

    fn keys_of(&self, owner_id: Uuid) -> Vec<ConversationKey> {
        self.participants
            .get(&owner_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Persist under the conversation mutex and fold the message into both
    /// participants' inbox rows before releasing it.
    fn insert(&self, draft: NewMessage) -> Message {
        let log = self.log_for(&draft.conversation_key);
        let mut log = log.lock();

        let now = truncate_to_micros(Utc::now());
        let created_at = match log.messages.last() {
            Some(prev) if prev.created_at > now => prev.created_at,
            _ => now,
        };
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let message = Message {
            id,
            conversation_key: draft.conversation_key.clone(),
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            context_id: draft.context_id(),
            body: draft.body,
            kind: draft.kind,
            idempotency_key: draft.idempotency_key,
            created_at,
            read: false,
            read_at: None,
        };
        let first = log.messages.is_empty();
        log.messages.push(message.clone());
        self.message_index
            .insert(id, message.conversation_key.clone());

        if first {
            for user in [message.sender_id, message.receiver_id] {
                self.participants
                    .entry(user)
                    .or_default()
                    .insert(message.conversation_key.clone());
            }
        }

        self.fold_into_inbox(message.receiver_id, &message, &draft.preview, true);
        self.fold_into_inbox(message.sender_id, &message, &draft.preview, false);

        message
    }

    fn fold_into_inbox(&self, owner_id: Uuid, message: &Message, preview: &str, unread: bool) {
        let key = &message.conversation_key;
        let Some(counterpart_id) = key.counterpart_of(owner_id) else {
            return;
        };
        let inbox = self.inbox_of(owner_id);
        let mut rows = inbox.write();
        let row = rows.entry(key.clone()).or_insert_with(|| {
            Arc::new(InboxRow {
                entry: RwLock::new(InboxEntry {
                    owner_id,
                    counterpart_id,
                    context_id: message.context_id.clone(),
                    conversation_key: key.clone(),
                    last_message_id: message.id,
                    last_message_preview: String::new(),
                    last_message_at: message.created_at,
                    last_sender_id: message.sender_id,
                    unread_count: 0,
                }),
                unread: AtomicU64::new(0),
            })
        });

        {
            let mut entry = row.entry.write();
            entry.last_message_id = message.id;
            entry.last_message_preview = preview.to_string();
            entry.last_message_at = message.created_at;
            entry.last_sender_id = message.sender_id;
        }
        if unread {
            row.unread.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn decrement_unread(&self, owner_id: Uuid, key: &ConversationKey, by: u64) {
        if by == 0 {
            return;
        }
        let Some(inbox) = self.inboxes.get(&owner_id).map(|i| i.clone()) else {
            return;
        };
        let rows = inbox.read();
        if let Some(row) = rows.get(key) {
            row.decrement(by);
        }
    }
}

#[async_trait]
impl MessagingStore for InMemoryStore {
    async fn append(&self, draft: NewMessage) -> AppResult<AppendOutcome> {
        if draft.sender_id == draft.receiver_id {
            return Err(AppError::Validation(
                "sender and receiver must differ".into(),
            ));
        }

        let Some(token) = draft.idempotency_key.clone() else {
            return Ok(AppendOutcome::Created(self.insert(draft)));
        };

        // The vacant slot stays locked until the message exists, so a
        // concurrent retry either waits here or sees the finished message.
        match self.idempotency.entry((draft.sender_id, token)) {
            Entry::Occupied(slot) => {
                let id = *slot.get();
                drop(slot);
                Ok(AppendOutcome::Duplicate(self.fetch(id)?))
            }
            Entry::Vacant(slot) => {
                let message = self.insert(draft);
                slot.insert(message.id);
                Ok(AppendOutcome::Created(message))
            }
        }
    }

    async fn get(&self, id: MessageId) -> AppResult<Message> {
        self.fetch(id)
    }

    async fn list_by_conversation(
        &self,
        key: &ConversationKey,
        after: Option<ThreadCursor>,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let Some(log) = self.existing_log(key) else {
            return Ok(Vec::new());
        };
        let log = log.lock();
        let start = match after {
            Some(cursor) => log.messages.partition_point(|m| !cursor.precedes(m)),
            None => 0,
        };
        Ok(log.messages[start..].iter().take(limit).cloned().collect())
    }

    async fn mark_read(&self, id: MessageId, acting_user_id: Uuid) -> AppResult<ReadOutcome> {
        let key = self.locate(id)?;
        let log = self
            .existing_log(&key)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        let mut log = log.lock();
        let pos = log
            .position(id)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;

        let message = &mut log.messages[pos];
        if message.receiver_id != acting_user_id {
            return Err(AppError::Forbidden(
                "only the receiver can mark a message read".into(),
            ));
        }
        if message.read {
            return Ok(ReadOutcome::AlreadyRead);
        }
        message.read = true;
        message.read_at = Some(truncate_to_micros(Utc::now()));
        let receiver = message.receiver_id;

        self.decrement_unread(receiver, &key, 1);
        Ok(ReadOutcome::Marked(key))
    }

    async fn unread_ids(
        &self,
        key: &ConversationKey,
        owner_id: Uuid,
    ) -> AppResult<Vec<MessageId>> {
        let Some(log) = self.existing_log(key) else {
            return Ok(Vec::new());
        };
        let log = log.lock();
        Ok(log
            .messages
            .iter()
            .filter(|m| m.is_unread_for(owner_id))
            .map(|m| m.id)
            .collect())
    }

    async fn mark_many_read(
        &self,
        key: &ConversationKey,
        owner_id: Uuid,
        ids: &[MessageId],
    ) -> AppResult<Vec<MessageId>> {
        let Some(log) = self.existing_log(key) else {
            return Ok(Vec::new());
        };
        let mut log = log.lock();
        let read_at = truncate_to_micros(Utc::now());
        let mut marked = Vec::new();

        for id in ids {
            let Some(pos) = log.position(*id) else {
                continue;
            };
            let message = &mut log.messages[pos];
            if message.is_unread_for(owner_id) {
                message.read = true;
                message.read_at = Some(read_at);
                marked.push(*id);
            }
        }

        self.decrement_unread(owner_id, key, marked.len() as u64);
        marked.sort();
        Ok(marked)
    }

    async fn list_inbox(&self, owner_id: Uuid) -> AppResult<Vec<InboxEntry>> {
        let Some(inbox) = self.inboxes.get(&owner_id).map(|i| i.clone()) else {
            return Ok(Vec::new());
        };
        let rows = inbox.read();
        Ok(rows.values().map(|row| row.snapshot()).collect())
    }

    async fn messages_involving(&self, owner_id: Uuid) -> AppResult<Vec<Message>> {
        let mut messages = Vec::new();
        for key in self.keys_of(owner_id) {
            if let Some(log) = self.existing_log(&key) {
                messages.extend(log.lock().messages.iter().cloned());
            }
        }
        Ok(messages)
    }

    async fn repair_inbox(
        &self,
        owner_id: Uuid,
        preview_chars: usize,
    ) -> AppResult<Vec<InboxEntry>> {
        let keys = self.keys_of(owner_id);
        let inbox = self.inbox_of(owner_id);
        let mut repaired = Vec::with_capacity(keys.len());

        for key in &keys {
            let Some(log) = self.existing_log(key) else {
                continue;
            };
            let log = log.lock();
            let Some(entry) = summarize_conversation(owner_id, key, &log.messages, preview_chars)
            else {
                continue;
            };

            let mut rows = inbox.write();
            let row = rows.entry(key.clone()).or_insert_with(|| {
                Arc::new(InboxRow {
                    entry: RwLock::new(entry.clone()),
                    unread: AtomicU64::new(0),
                })
            });
            *row.entry.write() = entry.clone();
            row.unread.store(entry.unread_count, Ordering::Release);
            repaired.push(entry);
        }

        // Keys are read while the inbox is write-locked: an append registers
        // its key before folding into the inbox, so no live row is swept.
        let mut rows = inbox.write();
        let known = self
            .participants
            .get(&owner_id)
            .map(|keys| keys.clone())
            .unwrap_or_default();
        rows.retain(|key, _| known.contains(key));
        drop(rows);

        sort_inbox(&mut repaired);
        Ok(repaired)
    }
}
