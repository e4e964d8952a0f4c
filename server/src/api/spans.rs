//! Span read and marker endpoints.
//!
//! The only legal mutation here is the marker pair (`starred`, `tags`);
//! identity, timing and stats are off limits outside ingest.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::AppState;
use crate::auth::AuthTenant;
use crate::ingest::OtlpErrorBody;
use crate::model::Span;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SpanApiError {
    #[error("span not found")]
    NotFound,

    #[error("no marker fields in request")]
    EmptyPatch,

    #[error("span store unavailable")]
    StoreUnavailable(String),

    #[error("span store request failed")]
    Internal(String),
}

impl From<StoreError> for SpanApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(detail) => Self::StoreUnavailable(detail),
            StoreError::Request(detail) => Self::Internal(detail),
        }
    }
}

impl IntoResponse for SpanApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, 5),
            Self::EmptyPatch => (StatusCode::BAD_REQUEST, 3),
            Self::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, 14),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, 13),
        };
        let body = Json(OtlpErrorBody {
            code,
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// `GET /v1/spans/{id}` — fetch one span for the authenticated tenant.
pub async fn get_span(
    State(state): State<AppState>,
    auth: AuthTenant,
    Path(id): Path<String>,
) -> Result<Json<Span>, SpanApiError> {
    let span = state
        .spans
        .get_by_id(auth.tenant, &id, None)
        .await?
        .ok_or(SpanApiError::NotFound)?;
    Ok(Json(span))
}

/// Marker fields a client may change after ingest.
#[derive(Debug, Deserialize)]
pub struct MarkerUpdate {
    #[serde(default)]
    pub starred: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// `PATCH /v1/spans/{id}/markers` — update `starred` and/or `tags`.
pub async fn update_markers(
    State(state): State<AppState>,
    auth: AuthTenant,
    Path(id): Path<String>,
    Json(update): Json<MarkerUpdate>,
) -> Result<Json<Span>, SpanApiError> {
    let mut patch = serde_json::Map::new();
    if let Some(starred) = update.starred {
        patch.insert("starred".to_owned(), json!(starred));
    }
    if let Some(tags) = update.tags {
        patch.insert("tags".to_owned(), json!(tags));
    }
    if patch.is_empty() {
        return Err(SpanApiError::EmptyPatch);
    }

    let span = state
        .spans
        .update_partial(auth.tenant, &id, &serde_json::Value::Object(patch))
        .await?
        .ok_or(SpanApiError::NotFound)?;
    Ok(Json(span))
}
