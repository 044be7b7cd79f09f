use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::TemplateKind;
use crate::state::AppState;

/// Internal hook for the applications workflow.
#[derive(Debug, Deserialize, Serialize)]
pub struct NotifyRequest {
    pub recipient_id: Uuid,
    #[serde(default)]
    pub context_id: Option<String>,
    pub kind: TemplateKind,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[post("/internal/v1/notifications")]
pub async fn notify(
    state: web::Data<AppState>,
    body: web::Json<NotifyRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let message = state
        .notifier
        .notify(
            body.recipient_id,
            body.context_id.as_deref(),
            body.kind,
            &body.params,
        )
        .await?;
    Ok(HttpResponse::Created().json(message))
}
