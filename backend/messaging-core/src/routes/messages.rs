use actix_web::{get, patch, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::MessageId;
use crate::services::SendMessage;
use crate::state::AppState;
use crate::store::MessagingStore;

#[derive(Debug, Deserialize, Serialize)]
pub struct MarkReadRequest {
    pub acting_user_id: Uuid,
}

#[post("/api/v1/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    body: web::Json<SendMessage>,
) -> Result<HttpResponse, AppError> {
    let message = state.messages.send(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(message))
}

#[get("/api/v1/messages/{id}")]
pub async fn get_message(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    let message = state.store.get(MessageId(path.into_inner())).await?;
    Ok(HttpResponse::Ok().json(message))
}

#[patch("/api/v1/messages/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<MarkReadRequest>,
) -> Result<HttpResponse, AppError> {
    state
        .reads
        .mark_read(MessageId(path.into_inner()), body.acting_user_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
