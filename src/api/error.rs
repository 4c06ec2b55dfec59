//! The uniform error envelope:
//! `{"error": {"code", "message", "type", "timestamp"}}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde_json::json;

use crate::auth::AuthError;
use crate::db::StoreError;
use crate::domain::DomainError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, kind, code, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", "VALIDATION_ERROR", message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", code, message)
    }

    fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "conflict", code, message)
    }

    /// Logs the cause; the client only sees a generic message.
    fn internal(cause: &dyn std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "SRV_001", "internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_client_error() {
            tracing::warn!(status = self.status.as_u16(), code = self.code, message = %self.message, "request rejected");
        }
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "type": self.kind,
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            }
        }));
        (self.status, body).into_response()
    }
}

fn from_store(err: StoreError) -> ApiError {
    match err {
        StoreError::Unique(_) | StoreError::Check(_) | StoreError::MissingReference => {
            ApiError::conflict("INTEGRITY_ERROR", err.to_string())
        }
        StoreError::Poisoned | StoreError::Sqlite(_) => ApiError::internal(&err),
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        from_store(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let message = err.to_string();
        match err {
            DomainError::Invalid { .. } => ApiError::validation(message),
            DomainError::InconsistentScope(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "validation_error", "INCONSISTENT_SCOPE", message)
            }
            DomainError::DuplicateRound(_) => ApiError::conflict("DUPLICATE_ROUND", message),
            DomainError::DuplicateStep(_) => ApiError::conflict("DUPLICATE_STEP", message),
            DomainError::DuplicateLink => ApiError::conflict("DUPLICATE_LINK", message),
            DomainError::SelfLinkRejected => ApiError::conflict("SELF_LINK", message),
            DomainError::ProjectNotFound => ApiError::not_found("PROJECT_NOT_FOUND", message),
            DomainError::RoundNotFound => ApiError::not_found("ROUND_NOT_FOUND", message),
            DomainError::StepNotFound => ApiError::not_found("STEP_NOT_FOUND", message),
            DomainError::NodeNotFound => ApiError::not_found("NODE_NOT_FOUND", message),
            DomainError::LinkNotFound => ApiError::not_found("LINK_NOT_FOUND", message),
            DomainError::LinkNotOwned => {
                ApiError::new(StatusCode::FORBIDDEN, "forbidden", "LINK_NOT_OWNED", message)
            }
            DomainError::Store(e) => from_store(e),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::MissingCredentials => {
                ApiError::new(StatusCode::BAD_REQUEST, "validation_error", "AUTH_001", message)
            }
            AuthError::InvalidCredentials => {
                ApiError::new(StatusCode::UNAUTHORIZED, "authentication_error", "AUTH_004", message)
            }
            AuthError::MissingToken | AuthError::InvalidToken => {
                ApiError::new(StatusCode::UNAUTHORIZED, "authentication_error", "AUTH_002", message)
            }
            AuthError::TooManyAttempts => {
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, "throttled", "AUTH_005", message)
            }
            AuthError::InvalidInput(_) => ApiError::validation(message),
            AuthError::UsernameTaken(_) => ApiError::conflict("INTEGRITY_ERROR", message),
            AuthError::Store(e) => from_store(e),
            AuthError::Hash(_) | AuthError::Encode(_) => ApiError::internal(&err),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// A body that parses but has the wrong shape is 422; anything else keeps
/// the rejection's own status (400 for bad syntax, 415, 413).
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), "validation_error", "VALIDATION_ERROR", rejection.body_text())
    }
}

/// `axum::Json` with rejections rendered through [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
