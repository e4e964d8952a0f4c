//! API router and application state.

pub mod spans;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::config::Config;
use crate::db::MetaStore;
use crate::ingest;
use crate::pricing::PricingTable;
use crate::ratelimit::AdmissionController;
use crate::store::SpanStore;

/// Maximum OTLP export body size (8 MiB).
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Metadata store (tenants, API keys, experiments, rate-limit events)
    pub meta: Arc<dyn MetaStore>,
    /// Span document store
    pub spans: Arc<dyn SpanStore>,
    /// Admission controller over the counter store
    pub admission: AdmissionController,
    /// Pricing table, read-only after startup
    pub pricing: Arc<PricingTable>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        config: Config,
        meta: Arc<dyn MetaStore>,
        spans: Arc<dyn SpanStore>,
        admission: AdmissionController,
        pricing: PricingTable,
    ) -> Self {
        Self {
            config: Arc::new(config),
            meta,
            spans,
            admission,
            pricing: Arc::new(pricing),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/v1/traces", post(ingest::export_traces))
        .route("/v1/spans/{id}", get(spans::get_span))
        .route("/v1/spans/{id}/markers", patch(spans::update_markers))
        .layer(from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}
