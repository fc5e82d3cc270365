//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

/// SQLSTATE raised by PostgreSQL for a NOT NULL violation.
pub const NOT_NULL_VIOLATION: &str = "23502";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid identifier for {kind}: '{value}'")]
    InvalidIdentifier { kind: &'static str, value: String },
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate {kind}: {value}")]
    Duplicate { kind: &'static str, value: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Constraint(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    /// Failure reported by a non-sqlx store, carrying an SQLSTATE-like code when known.
    #[error("persistence: {message}")]
    Persistence { code: Option<String>, message: String },
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found() -> Self {
        AppError::NotFound("Resource not found".into())
    }

    pub fn invalid_id() -> Self {
        AppError::BadRequest("ID is not valid".into())
    }

    /// Error code reported by the persistence layer, if any.
    pub fn sql_state(&self) -> Option<Cow<'_, str>> {
        match self {
            AppError::Db(sqlx::Error::Database(db)) => db.code(),
            AppError::Persistence { code, .. } => code.as_deref().map(Cow::Borrowed),
            _ => None,
        }
    }

    /// Message as reported by the persistence layer, without the variant prefix.
    pub fn store_message(&self) -> String {
        match self {
            AppError::Db(sqlx::Error::Database(db)) => db.message().to_string(),
            AppError::Persistence { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Constraint(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Config(_)
            | AppError::Db(_)
            | AppError::Persistence { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = if status.is_server_error() {
            tracing::error!(error = %self, "unhandled error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}
