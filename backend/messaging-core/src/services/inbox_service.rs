use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::inbox::{project_inbox, sort_inbox};
use crate::models::{ConversationKey, InboxEntry};
use crate::store::MessagingStore;

/// Outcome of comparing the live inbox with a replay of the message log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub owner_id: Uuid,
    /// Conversations whose live row was missing, stale, or unexpected.
    pub drifted: Vec<ConversationKey>,
    pub repaired: bool,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.drifted.is_empty()
    }
}

#[derive(Clone)]
pub struct InboxService {
    store: Arc<dyn MessagingStore>,
    preview_chars: usize,
}

impl InboxService {
    pub fn new(store: Arc<dyn MessagingStore>, preview_chars: usize) -> Self {
        Self {
            store,
            preview_chars,
        }
    }

    /// Live inbox, most recent activity first.
    pub async fn list_inbox(&self, owner_id: Uuid) -> AppResult<Vec<InboxEntry>> {
        let mut entries = self.store.list_inbox(owner_id).await?;
        sort_inbox(&mut entries);
        Ok(entries)
    }

    /// Recompute the inbox from the message log without touching the live
    /// rows. Same ordering as [`Self::list_inbox`].
    pub async fn rebuild(&self, owner_id: Uuid) -> AppResult<Vec<InboxEntry>> {
        let log = self.store.messages_involving(owner_id).await?;
        Ok(project_inbox(owner_id, &log, self.preview_chars))
    }

    /// Badge count across every conversation.
    pub async fn total_unread(&self, owner_id: Uuid) -> AppResult<u64> {
        let entries = self.store.list_inbox(owner_id).await?;
        Ok(entries.iter().map(|e| e.unread_count).sum())
    }

    /// Compare live rows with a replay and overwrite them when they differ.
    pub async fn reconcile(&self, owner_id: Uuid) -> AppResult<DriftReport> {
        let live = self.list_inbox(owner_id).await?;
        let expected = self.rebuild(owner_id).await?;

        let drifted = diff(&live, &expected);
        if drifted.is_empty() {
            debug!(owner_id = %owner_id, "inbox consistent");
            return Ok(DriftReport {
                owner_id,
                drifted,
                repaired: false,
            });
        }

        let drift = AppError::ConsistencyDrift {
            owner_id,
            detail: format!("{} conversation(s) out of date", drifted.len()),
        };
        warn!(owner_id = %owner_id, error = %drift, "repairing inbox projection");
        metrics::record_drift_repair();

        self.store.repair_inbox(owner_id, self.preview_chars).await?;
        Ok(DriftReport {
            owner_id,
            drifted,
            repaired: true,
        })
    }
}

fn diff(live: &[InboxEntry], expected: &[InboxEntry]) -> Vec<ConversationKey> {
    let live: BTreeMap<&ConversationKey, &InboxEntry> =
        live.iter().map(|e| (&e.conversation_key, e)).collect();
    let expected: BTreeMap<&ConversationKey, &InboxEntry> =
        expected.iter().map(|e| (&e.conversation_key, e)).collect();

    let keys: BTreeSet<&ConversationKey> = live.keys().chain(expected.keys()).copied().collect();
    keys.into_iter()
        .filter(|key| live.get(key) != expected.get(key))
        .cloned()
        .collect()
}
