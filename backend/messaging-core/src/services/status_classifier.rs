//! Heuristic hiring-stage label for a thread.
//!
//! Keyword matching only: the result is a display hint, never persisted and
//! never used for authorization or state changes.

use serde::{Deserialize, Serialize};

use crate::models::Message;

/// How many of the newest messages are inspected.
const LOOKBACK: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Applied,
    Interview,
    Offer,
    Rejected,
}

// Checked in order; the first stage with a matching keyword wins.
const RULES: &[(ConversationStatus, &[&str])] = &[
    (
        ConversationStatus::Rejected,
        &["not selected", "rejected", "unfortunately", "not moving forward"],
    ),
    (
        ConversationStatus::Offer,
        &["offer", "accepted", "congratulations"],
    ),
    (ConversationStatus::Interview, &["interview"]),
    (ConversationStatus::Applied, &["applied", "application"]),
];

fn classify_text(body: &str) -> Option<ConversationStatus> {
    let body = body.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| body.contains(k)))
        .map(|(status, _)| *status)
}

/// Label from the newest message that matches any keyword. `messages` is a
/// thread in ascending order.
pub fn classify_thread(messages: &[Message]) -> Option<ConversationStatus> {
    messages
        .iter()
        .rev()
        .take(LOOKBACK)
        .find_map(|m| classify_text(&m.body))
}
