use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Why an authenticated principal was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    RoleMismatch,
    NotOwner,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::RoleMismatch => "role_mismatch",
            DenyReason::NotOwner => "not_owner",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid or revoked token")]
    InvalidToken,

    #[error("forbidden: {0}")]
    Forbidden(DenyReason),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingCredentials | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::InvalidToken | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Signing(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, code, msg) = match &self {
            AppError::MissingCredentials => (
                "authentication_error",
                "no_credentials",
                "missing bearer token".to_string(),
            ),
            AppError::InvalidToken => (
                "authentication_error",
                "invalid_or_revoked",
                "invalid, expired or revoked token".to_string(),
            ),
            AppError::Forbidden(reason) => (
                "permission_error",
                reason.code(),
                match reason {
                    DenyReason::RoleMismatch => "insufficient role for this operation".to_string(),
                    DenyReason::NotOwner => "only the owner or an admin may do this".to_string(),
                },
            ),
            AppError::InvalidCredentials => (
                "authentication_error",
                "invalid_credentials",
                "invalid email or password".to_string(),
            ),
            AppError::NotFound(what) => (
                "not_found_error",
                "not_found",
                format!("{} not found", what),
            ),
            AppError::Validation(msg) => ("invalid_request_error", "validation_failed", msg.clone()),
            AppError::Signing(e) => {
                tracing::error!("Token signing error: {}", e);
                (
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {:#}", e);
                (
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
