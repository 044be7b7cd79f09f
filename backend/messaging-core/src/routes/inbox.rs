use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::InboxEntry;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct InboxResponse {
    pub owner_id: Uuid,
    pub entries: Vec<InboxEntry>,
    pub total_unread: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadResponse {
    pub owner_id: Uuid,
    pub unread: u64,
}

#[get("/api/v1/users/{owner_id}/inbox")]
pub async fn list_inbox(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let owner_id = path.into_inner();
    let entries = state.inbox.list_inbox(owner_id).await?;
    let total_unread = entries.iter().map(|e| e.unread_count).sum();
    Ok(HttpResponse::Ok().json(InboxResponse {
        owner_id,
        entries,
        total_unread,
    }))
}

#[get("/api/v1/users/{owner_id}/inbox/unread")]
pub async fn unread_badge(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let owner_id = path.into_inner();
    let unread = state.inbox.total_unread(owner_id).await?;
    Ok(HttpResponse::Ok().json(UnreadResponse { owner_id, unread }))
}

#[post("/api/v1/users/{owner_id}/inbox/reconcile")]
pub async fn reconcile_inbox(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let report = state.inbox.reconcile(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(report))
}
