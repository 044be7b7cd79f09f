use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::conversation::ConversationKey;
use super::message::{Message, MessageId};

/// Per-owner summary row of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub owner_id: Uuid,
    pub counterpart_id: Uuid,
    pub context_id: Option<String>,
    pub conversation_key: ConversationKey,
    pub last_message_id: MessageId,
    pub last_message_preview: String,
    pub last_message_at: DateTime<Utc>,
    pub last_sender_id: Uuid,
    pub unread_count: u64,
}

impl InboxEntry {
    /// True when the owner wrote the latest message.
    pub fn replied(&self) -> bool {
        self.last_sender_id == self.owner_id
    }

    /// Most recently active first, ties by conversation key.
    pub fn activity_order(a: &InboxEntry, b: &InboxEntry) -> Ordering {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.conversation_key.cmp(&b.conversation_key))
    }
}

pub fn sort_inbox(entries: &mut [InboxEntry]) {
    entries.sort_by(InboxEntry::activity_order);
}

/// Inbox preview of a body: at most `max_chars` chars, `…` appended when cut.
pub fn preview(body: &str, max_chars: usize) -> String {
    let body = body.trim();
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let mut out: String = body.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Summarize one conversation for `owner_id` from its full log.
/// Returns `None` when the owner is not a participant or the log is empty.
pub fn summarize_conversation<'a, I>(
    owner_id: Uuid,
    key: &ConversationKey,
    messages: I,
    preview_chars: usize,
) -> Option<InboxEntry>
where
    I: IntoIterator<Item = &'a Message>,
{
    let counterpart_id = key.counterpart_of(owner_id)?;
    let mut last: Option<&Message> = None;
    let mut unread_count = 0u64;

    for message in messages {
        if message.is_unread_for(owner_id) {
            unread_count += 1;
        }
        if last.map_or(true, |l| message.sort_key() > l.sort_key()) {
            last = Some(message);
        }
    }

    let last = last?;
    Some(InboxEntry {
        owner_id,
        counterpart_id,
        context_id: key.context_id().map(str::to_string),
        conversation_key: key.clone(),
        last_message_id: last.id,
        last_message_preview: preview(&last.body, preview_chars),
        last_message_at: last.created_at,
        last_sender_id: last.sender_id,
        unread_count,
    })
}

/// Replay a flat message log into the owner's inbox, in inbox order.
pub fn project_inbox(owner_id: Uuid, messages: &[Message], preview_chars: usize) -> Vec<InboxEntry> {
    let mut by_conversation: BTreeMap<&ConversationKey, Vec<&Message>> = BTreeMap::new();
    for message in messages
        .iter()
        .filter(|m| m.conversation_key.involves(owner_id))
    {
        by_conversation
            .entry(&message.conversation_key)
            .or_default()
            .push(message);
    }

    let mut entries: Vec<InboxEntry> = by_conversation
        .into_iter()
        .filter_map(|(key, log)| summarize_conversation(owner_id, key, log, preview_chars))
        .collect();
    sort_inbox(&mut entries);
    entries
}
