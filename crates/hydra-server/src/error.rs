//! HTTP error types for the Hydra control plane.
//!
//! Every domain error exposes an [`hydra_core::ErrorKind`], and this module
//! maps that four-way kind to an HTTP status once, in one place, instead of
//! re-deriving the mapping per domain error enum. Every response body is
//! JSON with a machine-readable `error` field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use hydra_core::{ContainerError, ErrorKind, MigrationError, QuotaError};
use hydra_store::StoreError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid input (bad route name, reserved port, unknown preset...).
    BadRequest(String),
    /// Caller is not authenticated.
    Unauthorized(String),
    /// Caller is authenticated but not permitted to perform this action.
    Forbidden(String),
    /// Requested resource does not exist.
    NotFound(String),
    /// A precondition was not met (quota exceeded, request already decided...).
    Conflict(String),
    /// A backend or store call failed and the caller may retry.
    Unavailable(String),
    /// The requested capability has no implementation behind it yet.
    NotImplemented(String),
    /// Anything else.
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            Self::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, "not_implemented", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody { error: error_type, message };
        (status, axum::Json(body)).into_response()
    }
}

fn from_kind(kind: ErrorKind, message: String) -> AppError {
    match kind {
        ErrorKind::Input => AppError::BadRequest(message),
        ErrorKind::Precondition => AppError::Conflict(message),
        ErrorKind::Transient => AppError::Unavailable(message),
        ErrorKind::Operation => AppError::Internal(message),
    }
}

impl From<ContainerError> for AppError {
    fn from(err: ContainerError) -> Self {
        if matches!(err, ContainerError::NotFound { .. }) {
            return Self::NotFound(err.to_string());
        }
        if matches!(err, ContainerError::AlreadyExists { .. }) {
            return Self::Conflict(err.to_string());
        }
        from_kind(err.kind(), err.to_string())
    }
}

impl From<MigrationError> for AppError {
    fn from(err: MigrationError) -> Self {
        if matches!(err, MigrationError::NoContainer { .. }) {
            return Self::NotFound(err.to_string());
        }
        from_kind(err.kind(), err.to_string())
    }
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        if matches!(err, QuotaError::NoQuota { .. } | QuotaError::RequestNotFound { .. }) {
            return Self::NotFound(err.to_string());
        }
        from_kind(err.kind(), err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Conflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Open { .. } | StoreError::Query { .. } | StoreError::Serialization { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_not_found_maps_to_404() {
        let err = ContainerError::NotFound { username: "alice".to_owned() };
        let resp = AppError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn container_quota_exceeded_maps_to_409() {
        let err = ContainerError::QuotaExceeded { reason: "over cap".to_owned() };
        let resp = AppError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
