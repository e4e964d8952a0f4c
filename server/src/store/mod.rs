//! Span store contract.
//!
//! Spans live in an Elasticsearch-compatible document store, keyed by span id
//! in per-tenant indices. Everything the pipeline needs from the store goes
//! through [`SpanStore`], so tests can swap in the in-memory double from
//! [`crate::testing`].

mod es;
pub mod query;

pub use es::EsSpanStore;
pub use query::QueryNode;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::Span;

/// Span store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection refused, timed out, or the store itself is down.
    /// Surfaces as 503 / gRPC `UNAVAILABLE`.
    #[error("span store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but rejected or failed the request.
    #[error("span store request failed: {0}")]
    Request(String),
}

/// Sort direction for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A structured search over one tenant's spans.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: QueryNode,
    pub limit: usize,
    pub offset: usize,
    pub sort: Option<(String, SortOrder)>,
    pub source_includes: Vec<String>,
    pub source_excludes: Vec<String>,
}

impl SearchRequest {
    /// A query with default paging (first 100 hits) and full documents.
    #[must_use]
    pub fn new(query: QueryNode) -> Self {
        Self {
            query,
            limit: 100,
            offset: 0,
            sort: None,
            source_includes: Vec::new(),
            source_excludes: Vec::new(),
        }
    }
}

/// Search hits plus the store's total match count.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub hits: Vec<Span>,
    pub total: u64,
}

/// Contract implemented by the document store adapter.
///
/// The tenant is a mandatory scope on every operation; no call may read or
/// write another tenant's documents.
#[async_trait]
pub trait SpanStore: Send + Sync {
    /// Insert or overwrite the given spans, keyed by span id.
    async fn bulk_insert(&self, tenant: Uuid, spans: &[Span]) -> Result<(), StoreError>;

    /// Fetch one span by id, optionally projecting only the named fields.
    async fn get_by_id(
        &self,
        tenant: Uuid,
        id: &str,
        source_includes: Option<&[&str]>,
    ) -> Result<Option<Span>, StoreError>;

    /// Run a structured boolean query over the tenant's spans.
    async fn search(
        &self,
        tenant: Uuid,
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError>;

    /// Merge `patch` into the document with the given id. Returns the
    /// updated span, or `None` when no such document exists.
    async fn update_partial(
        &self,
        tenant: Uuid,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<Option<Span>, StoreError>;

    /// Delete spans by span id. Returns the number of deleted documents.
    async fn delete_by_ids(&self, tenant: Uuid, ids: &[String]) -> Result<u64, StoreError>;

    /// Delete all spans of the given traces. Returns the deleted count.
    async fn delete_by_traces(&self, tenant: Uuid, traces: &[String]) -> Result<u64, StoreError>;
}

/// Projection used when loading spans during stats propagation: the fields
/// own-stat derivation and experiment linkage read, not payloads.
pub const STATS_PROJECTION: [&str; 10] = [
    "id",
    "parent",
    "trace",
    "tenant",
    "attributes",
    "stats",
    "_childStats",
    "status",
    "durationMs",
    "experiment",
];
