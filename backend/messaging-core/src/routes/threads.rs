use actix_web::{get, patch, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Message;
use crate::services::{classify_thread, ConversationStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ThreadQuery {
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub context_id: Option<String>,
    pub cursor: Option<String>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadResponse {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
    /// Keyword-based hint computed from this page only.
    pub status_hint: Option<ConversationStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkThreadReadRequest {
    pub user_a: Uuid,
    pub user_b: Uuid,
    #[serde(default)]
    pub context_id: Option<String>,
    pub acting_user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkThreadReadResponse {
    pub marked: u64,
}

#[get("/api/v1/threads")]
pub async fn get_thread(
    state: web::Data<AppState>,
    query: web::Query<ThreadQuery>,
) -> Result<HttpResponse, AppError> {
    let query = query.into_inner();
    let page = state
        .threads
        .get_thread(
            query.user_a,
            query.user_b,
            query.context_id.as_deref(),
            query.cursor.as_deref(),
            query.page_size,
        )
        .await?;

    let status_hint = classify_thread(&page.messages);
    Ok(HttpResponse::Ok().json(ThreadResponse {
        messages: page.messages,
        next_cursor: page.next_cursor,
        status_hint,
    }))
}

#[patch("/api/v1/threads/read")]
pub async fn mark_thread_read(
    state: web::Data<AppState>,
    body: web::Json<MarkThreadReadRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let marked = state
        .reads
        .mark_all_read_in_conversation(
            body.user_a,
            body.user_b,
            body.context_id.as_deref(),
            body.acting_user_id,
        )
        .await?;
    Ok(HttpResponse::Ok().json(MarkThreadReadResponse { marked }))
}
