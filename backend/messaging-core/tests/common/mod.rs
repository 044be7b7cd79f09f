//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use messaging_core::config::Config;
use messaging_core::models::Message;
use messaging_core::services::SendMessage;
use messaging_core::state::AppState;
use messaging_core::store::InMemoryStore;
use std::sync::Arc;
use uuid::Uuid;

/// Services wired around a fresh in-memory store.
pub fn in_memory_state() -> AppState {
    AppState::new(
        Arc::new(Config::test_defaults()),
        Arc::new(InMemoryStore::new()),
    )
}

pub fn request(sender: Uuid, receiver: Uuid, context: Option<&str>, body: &str) -> SendMessage {
    SendMessage {
        sender_id: sender,
        receiver_id: receiver,
        body: body.to_string(),
        context_id: context.map(str::to_string),
        idempotency_key: None,
    }
}

pub async fn send(
    state: &AppState,
    sender: Uuid,
    receiver: Uuid,
    context: Option<&str>,
    body: &str,
) -> Message {
    state
        .messages
        .send(request(sender, receiver, context, body))
        .await
        .expect("send message")
}
