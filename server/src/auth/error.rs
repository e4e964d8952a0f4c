//! Authentication error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::ingest::error::OtlpErrorBody;

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing Authorization header.
    #[error("Missing authorization header")]
    MissingAuthHeader,

    /// Authorization header is neither `ApiKey` nor `Bearer`.
    #[error("Invalid authorization header format")]
    InvalidAuthHeader,

    /// Unknown API key.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Invalid or expired bearer token.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// Authenticated but the role set lacks ingest permission.
    #[error("Role lacks ingest permission")]
    PermissionDenied,

    /// Metadata store failure during key lookup.
    #[error("Authentication backend error")]
    Backend(String),
}

impl AuthError {
    /// OTLP/gRPC status code for the error body.
    #[must_use]
    pub const fn otlp_code(&self) -> i32 {
        match self {
            Self::PermissionDenied => 7,
            Self::Backend(_) => 13,
            _ => 16,
        }
    }

    /// Translate to a gRPC status for the tonic surface.
    #[must_use]
    pub fn grpc_status(&self) -> tonic::Status {
        match self {
            Self::PermissionDenied => tonic::Status::permission_denied(self.to_string()),
            Self::Backend(detail) => tonic::Status::internal(detail.clone()),
            _ => tonic::Status::unauthenticated(self.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = Json(OtlpErrorBody {
            code: self.otlp_code(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;
