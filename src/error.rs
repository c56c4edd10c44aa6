use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{auth::github::OAuthError, users::repo::StoreError, validation::FieldError};

/// Reasons a caller failed to prove who they are.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("no bearer token presented")]
    NoToken,
    #[error("token signature or format is invalid")]
    InvalidToken,
    #[error("token has expired")]
    TokenExpired,
    #[error("token subject no longer exists")]
    UnknownSubject,
    #[error("email or password does not match")]
    InvalidCredentials,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),
    #[error("{0} already in use")]
    Conflict(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("oauth exchange failed: {0}")]
    Upstream(#[from] OAuthError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(field) => AppError::Conflict(field.to_string()),
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Validation Error", "details": details })),
            )
                .into_response(),
            AppError::Conflict(field) => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "Conflict",
                    "details": [format!("{field} already in use")],
                })),
            )
                .into_response(),
            AppError::Auth(kind) => {
                warn!(reason = ?kind, "request rejected");
                let message = match kind {
                    AuthError::InvalidCredentials => "Invalid credentials",
                    _ => "Unauthorized",
                };
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
            }
            AppError::Upstream(e) => {
                error!(error = %e, "identity provider call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "Upstream provider error" })),
                )
                    .into_response()
            }
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal Server Error" })),
                )
                    .into_response()
            }
        }
    }
}
