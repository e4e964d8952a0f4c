//! Reusable test helpers for pipeline and HTTP integration tests.
//!
//! Provides `TestApp` for building and sending requests through the full
//! axum router, wired to the in-memory collaborator doubles so no Postgres,
//! Redis or Elasticsearch is needed.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{self, Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use traceloom_server::api::{create_router, AppState};
use traceloom_server::config::Config;
use traceloom_server::pricing::PricingTable;
use traceloom_server::ratelimit::AdmissionController;
use traceloom_server::testing::{MemoryCounterStore, MemoryMetaStore, MemorySpanStore};

/// Plaintext API key registered for the test tenant.
pub const TEST_API_KEY: &str = "tl_test_key";

/// A test application wrapping the full axum router over memory stores.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub tenant: Uuid,
    pub spans: Arc<MemorySpanStore>,
    pub counter: Arc<MemoryCounterStore>,
    pub meta: Arc<MemoryMetaStore>,
}

impl TestApp {
    /// Create a test app with an API key carrying the `trace` role.
    pub fn new() -> Self {
        Self::with_roles(&["trace"])
    }

    /// Create a test app whose API key carries the given roles.
    pub fn with_roles(roles: &[&str]) -> Self {
        let tenant = Uuid::new_v4();
        let spans = Arc::new(MemorySpanStore::new());
        let counter = Arc::new(MemoryCounterStore::new());
        let meta = Arc::new(MemoryMetaStore::new());
        meta.add_api_key(TEST_API_KEY, tenant, roles);

        let counter_store: Arc<dyn traceloom_server::ratelimit::CounterStore> = counter.clone();
        let admission = AdmissionController::new(Some(counter_store), meta.clone());
        let state = AppState::new(
            Config::default_for_test(),
            meta.clone(),
            spans.clone(),
            admission,
            PricingTable::load(None).expect("embedded pricing table"),
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            tenant,
            spans,
            counter,
            meta,
        }
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router call is infallible")
    }

    /// POST an OTLP/JSON export with the test credential.
    pub async fn export_json(&self, body: serde_json::Value) -> Response<Body> {
        self.export_json_with_key(body, TEST_API_KEY).await
    }

    pub async fn export_json_with_key(
        &self,
        body: serde_json::Value,
        api_key: &str,
    ) -> Response<Body> {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/traces")
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::AUTHORIZATION, format!("ApiKey {api_key}"))
            .body(Body::from(body.to_string()))
            .expect("request builds");
        self.oneshot(request).await
    }

    /// POST raw bytes as an OTLP/Protobuf export.
    pub async fn export_protobuf(&self, body: Vec<u8>) -> Response<Body> {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/traces")
            .header(http::header::CONTENT_TYPE, "application/x-protobuf")
            .header(
                http::header::AUTHORIZATION,
                format!("ApiKey {TEST_API_KEY}"),
            )
            .body(Body::from(body))
            .expect("request builds");
        self.oneshot(request).await
    }

    /// GET a span through the HTTP surface.
    pub async fn get_span(&self, id: &str) -> Response<Body> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("/v1/spans/{id}"))
            .header(
                http::header::AUTHORIZATION,
                format!("ApiKey {TEST_API_KEY}"),
            )
            .body(Body::empty())
            .expect("request builds");
        self.oneshot(request).await
    }

    /// Fetch a span and parse the JSON body, asserting 200.
    pub async fn get_span_json(&self, id: &str) -> serde_json::Value {
        let response = self.get_span(id).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

// ============================================================================
// OTLP/JSON payload builders
// ============================================================================

/// Builder for one span inside an export payload.
pub struct SpanJson {
    value: serde_json::Value,
}

impl SpanJson {
    pub fn new(trace: &str, id: &str, name: &str) -> Self {
        Self {
            value: serde_json::json!({
                "traceId": trace,
                "spanId": id,
                "name": name,
                "kind": 1,
                "startTimeUnixNano": 1_700_000_000_000_i64,
                "endTimeUnixNano": 1_700_000_001_000_i64,
                "status": {"code": 1},
                "attributes": []
            }),
        }
    }

    pub fn parent(mut self, parent: &str) -> Self {
        self.value["parentSpanId"] = serde_json::json!(parent);
        self
    }

    pub fn times_ms(mut self, start: i64, end: i64) -> Self {
        self.value["startTimeUnixNano"] = serde_json::json!(start);
        self.value["endTimeUnixNano"] = serde_json::json!(end);
        self
    }

    pub fn error(mut self) -> Self {
        self.value["status"] = serde_json::json!({"code": 2, "message": "failed"});
        self
    }

    pub fn tokens(self, input: i64, output: i64) -> Self {
        self.attr_int("inputTokens", input).attr_int("outputTokens", output)
    }

    pub fn attr_int(mut self, key: &str, value: i64) -> Self {
        self.value["attributes"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"key": key, "value": {"intValue": value.to_string()}}));
        self
    }

    pub fn attr_str(mut self, key: &str, value: &str) -> Self {
        self.value["attributes"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"key": key, "value": {"stringValue": value}}));
        self
    }

    pub fn build(self) -> serde_json::Value {
        self.value
    }
}

/// Wrap spans into a full `ExportTraceServiceRequest` JSON body.
pub fn export_body(spans: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [
                    {"key": "service.name", "value": {"stringValue": "test-agent"}}
                ]
            },
            "scopeSpans": [{
                "scope": {"name": "test-sdk", "version": "0.0.1"},
                "spans": spans
            }]
        }]
    })
}

/// Deterministic hex ids for tests.
pub fn trace_id(n: u8) -> String {
    hex::encode([n; 16])
}

pub fn span_id(n: u8) -> String {
    hex::encode([n; 8])
}

/// Poll a condition for up to ~1 second, for fire-and-forget effects.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
