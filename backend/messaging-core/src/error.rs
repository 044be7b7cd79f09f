use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Malformed input: empty/oversized body, self-messaging, bad cursor.
    #[error("validation error: {0}")]
    Validation(String),

    /// Misuse of a pure helper such as the conversation key resolver.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Inbox cache diverged from the message log. Never user-visible.
    #[error("inbox drift for owner {owner_id}: {detail}")]
    ConsistencyDrift { owner_id: Uuid, detail: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            other => AppError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        AppError::StartServer(format!("database migrations failed: {e}"))
    }
}

impl AppError {
    /// Only storage outages are worth retrying; validation and authorization
    /// failures must be fixed by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }

    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::InvalidArgument(_) => 400,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::StoreUnavailable(_) => 503,
            AppError::ConsistencyDrift { .. }
            | AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Internal => 500,
        }
    }

    fn error_type_and_code(&self) -> (&'static str, &'static str) {
        match self {
            AppError::Validation(_) => ("validation_error", "VALIDATION_ERROR"),
            AppError::InvalidArgument(_) => ("validation_error", "INVALID_ARGUMENT"),
            AppError::Forbidden(_) => ("authorization_error", "FORBIDDEN"),
            AppError::NotFound(_) => ("not_found_error", "NOT_FOUND"),
            AppError::StoreUnavailable(_) => ("server_error", "STORE_UNAVAILABLE"),
            AppError::ConsistencyDrift { .. } => ("server_error", "CONSISTENCY_DRIFT"),
            AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => {
                ("server_error", "INTERNAL_SERVER_ERROR")
            }
        }
    }

    /// Message safe to return to callers. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::ConsistencyDrift { .. }
            | AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Internal => "internal server error".to_string(),
            AppError::StoreUnavailable(_) => "storage temporarily unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

/// JSON error body returned by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    pub error_type: String,
    pub code: String,
}

pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = err.error_type_and_code();

    let response = ErrorResponse {
        error: status
            .canonical_reason()
            .unwrap_or("Error")
            .to_string(),
        message: err.public_message(),
        status: status.as_u16(),
        error_type: error_type.to_string(),
        code: code.to_string(),
    };

    (status, response)
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code() >= 500 {
            tracing::error!(error = %self, "request failed");
        }
        let (status, body) = map_error(self);
        HttpResponse::build(status).json(body)
    }
}
