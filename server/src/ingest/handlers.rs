//! HTTP ingest handler and the shared pipeline.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceResponse;
use prost::Message as _;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::IngestError;
use crate::api::AppState;
use crate::auth::AuthTenant;
use crate::cost::attach_cost;
use crate::model::Span;
use crate::otlp::{decode_export, validate_spans, ContentKind};
use crate::ratelimit::Admission;
use crate::stats::propagate_batch;
use crate::{experiments, stats};

/// `POST /v1/traces` — OTLP/HTTP trace export, JSON or Protobuf.
pub async fn export_traces(
    State(state): State<AppState>,
    auth: AuthTenant,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngestError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let kind = ContentKind::from_content_type(content_type).ok_or_else(|| {
        IngestError::InvalidArgument(format!("unsupported content type: {content_type}"))
    })?;

    let spans = decode_export(kind, &body)?;
    run_pipeline_detached(state, auth.tenant, spans).await?;

    // Success is an empty ExportTraceServiceResponse in the request encoding
    let response = match kind {
        ContentKind::Json => Json(serde_json::json!({})).into_response(),
        ContentKind::Protobuf => (
            [(CONTENT_TYPE, "application/x-protobuf")],
            ExportTraceServiceResponse {
                partial_success: None,
            }
            .encode_to_vec(),
        )
            .into_response(),
    };
    Ok(response)
}

/// Run the pipeline on its own task, so a client disconnect cannot drop the
/// request future mid-pipeline and leak partial writes.
pub async fn run_pipeline_detached(
    state: AppState,
    tenant: Uuid,
    spans: Vec<Span>,
) -> Result<(), IngestError> {
    tokio::spawn(async move { run_pipeline(&state, tenant, spans).await })
        .await
        .unwrap_or_else(|e| Err(IngestError::Internal(format!("pipeline task failed: {e}"))))
}

/// The ingest pipeline shared by the HTTP and gRPC surfaces: validate,
/// admit, attribute, propagate, persist, record usage, fan out.
///
/// The caller has already authenticated and decoded; an empty batch is
/// success with no work.
pub async fn run_pipeline(
    state: &AppState,
    tenant: Uuid,
    mut spans: Vec<Span>,
) -> Result<(), IngestError> {
    validate_spans(&spans)?;
    if spans.is_empty() {
        return Ok(());
    }

    let now_ms = Utc::now().timestamp_millis();
    if let Admission::Rejected { retry_after_secs } = state.admission.admit(tenant, now_ms).await
    {
        return Err(IngestError::RateLimited { retry_after_secs });
    }

    for span in &mut spans {
        span.tenant = Some(tenant);
        attach_cost(span, &state.pricing);
        span.duration_ms = Some(span.end - span.start);
    }

    // Best-effort: a degraded propagation round never fails the ingest.
    // Batch spans carry at least their own stats either way.
    let outcome = propagate_batch(state.spans.as_ref(), tenant, &mut spans).await;
    if outcome.patches_failed > 0 {
        warn!(
            tenant = %tenant,
            failed = outcome.patches_failed,
            "Some ancestor patches failed; a later batch will repair them"
        );
    }
    for span in &mut spans {
        if span.stats.is_none() {
            span.stats = Some(stats::own_stats(span));
        }
    }

    state.spans.bulk_insert(tenant, &spans).await?;

    state.admission.record_usage(tenant, spans.len(), now_ms);
    experiments::spawn_updates(state.meta.clone(), tenant, outcome.roots);

    debug!(tenant = %tenant, spans = spans.len(), "Batch ingested");
    Ok(())
}
