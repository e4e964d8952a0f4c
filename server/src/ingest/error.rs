//! Ingest error types and OTLP status mapping.

use axum::http::header::HeaderValue;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::otlp::DecodeError;
use crate::store::StoreError;

/// The `{code, message}` error body shared by every failure response,
/// matching the OTLP/HTTP error shape. `code` carries the gRPC status code.
#[derive(Debug, Serialize)]
pub struct OtlpErrorBody {
    pub code: i32,
    pub message: String,
}

/// Failures of the ingest pipeline that surface to the client.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Decoder or validation failure. Not retryable.
    #[error("{0}")]
    InvalidArgument(String),

    /// Admission rejected the request. Retryable after the hint.
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: i64 },

    /// The span store could not be reached. Retryable.
    #[error("span store unavailable")]
    StoreUnavailable(String),

    /// The span store rejected the write, or the pipeline task died.
    #[error("internal error")]
    Internal(String),
}

impl From<DecodeError> for IngestError {
    fn from(error: DecodeError) -> Self {
        Self::InvalidArgument(error.to_string())
    }
}

impl From<StoreError> for IngestError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(detail) => Self::StoreUnavailable(detail),
            StoreError::Request(detail) => Self::Internal(detail),
        }
    }
}

impl IngestError {
    /// OTLP status code for the error body.
    #[must_use]
    pub const fn otlp_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => 3,
            Self::RateLimited { .. } | Self::StoreUnavailable(_) => 14,
            Self::Internal(_) => 13,
        }
    }

    /// Translate to a gRPC status for the tonic surface.
    #[must_use]
    pub fn grpc_status(&self) -> tonic::Status {
        match self {
            Self::InvalidArgument(message) => tonic::Status::invalid_argument(message.clone()),
            Self::RateLimited { .. } => tonic::Status::resource_exhausted(self.to_string()),
            Self::StoreUnavailable(detail) => {
                tonic::Status::unavailable(format!("span store unavailable: {detail}"))
            }
            Self::Internal(detail) => tonic::Status::internal(detail.clone()),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(OtlpErrorBody {
            code: self.otlp_code(),
            message: self.to_string(),
        });

        match self {
            Self::RateLimited { retry_after_secs } => {
                let mut response = (status, body).into_response();
                if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert("Retry-After", v);
                }
                response
            }
            _ => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_otlp_mapping() {
        assert_eq!(IngestError::InvalidArgument("x".into()).otlp_code(), 3);
        assert_eq!(
            IngestError::RateLimited {
                retry_after_secs: 5
            }
            .otlp_code(),
            14
        );
        assert_eq!(IngestError::StoreUnavailable("x".into()).otlp_code(), 14);
    }

    #[test]
    fn grpc_statuses_map_by_error_class() {
        assert_eq!(
            IngestError::InvalidArgument("x".into()).grpc_status().code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            IngestError::RateLimited {
                retry_after_secs: 5
            }
            .grpc_status()
            .code(),
            tonic::Code::ResourceExhausted
        );
        assert_eq!(
            IngestError::StoreUnavailable("x".into()).grpc_status().code(),
            tonic::Code::Unavailable
        );
    }
}
