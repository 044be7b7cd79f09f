use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::error::AppError;
use crate::metrics::metrics_handler;

pub mod inbox;
pub mod messages;
pub mod notifications;
pub mod threads;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Register every endpoint. Malformed JSON bodies and query strings are
/// reported through the same error envelope as domain errors.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .service(health)
    .route("/metrics", web::get().to(metrics_handler))
    .service(messages::send_message)
    .service(messages::get_message)
    .service(messages::mark_read)
    .service(inbox::list_inbox)
    .service(inbox::unread_badge)
    .service(inbox::reconcile_inbox)
    .service(threads::get_thread)
    .service(threads::mark_thread_read)
    .service(notifications::notify);
}
