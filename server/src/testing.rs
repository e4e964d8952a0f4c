//! In-memory collaborator doubles.
//!
//! The integration suite runs the whole pipeline — both endpoints included —
//! against these, with no Postgres, Redis or Elasticsearch running. Each
//! double honors the corresponding contract closely enough for the behaviour
//! under test: tenant scoping, projections, partial updates, bucketed
//! counters, and the rate-limit event log.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::db::{ApiKeyRecord, Experiment, MetaError, MetaStore};
use crate::model::Span;
use crate::ratelimit::{bucket_reset_ms, hour_bucket, CounterError, CounterStore, LimitDecision};
use crate::store::{SearchRequest, SearchResponse, SpanStore, StoreError};

// ============================================================================
// MemorySpanStore
// ============================================================================

/// Span store double over a sorted in-memory document map.
#[derive(Default)]
pub struct MemorySpanStore {
    docs: Mutex<BTreeMap<(Uuid, String), Value>>,
    /// Successful partial updates, for write-amplification assertions.
    pub update_calls: AtomicUsize,
    /// Bulk insert calls.
    pub bulk_calls: AtomicUsize,
    /// When set, every call fails like a lost connection.
    pub offline: AtomicBool,
}

impl MemorySpanStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    /// Number of stored documents for a tenant.
    #[must_use]
    pub fn len(&self, tenant: Uuid) -> usize {
        self.docs
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| *t == tenant)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self, tenant: Uuid) -> bool {
        self.len(tenant) == 0
    }

    /// Seed a document directly, as if written by an earlier batch.
    pub fn seed(&self, tenant: Uuid, span: &Span) {
        let mut doc = serde_json::to_value(span).expect("span serializes");
        doc["tenant"] = serde_json::json!(tenant);
        self.docs
            .lock()
            .unwrap()
            .insert((tenant, span.id.clone()), doc);
    }
}

fn project(doc: &Value, includes: Option<&[&str]>) -> Value {
    match includes {
        None => doc.clone(),
        Some(fields) => {
            let mut out = serde_json::Map::new();
            if let Some(map) = doc.as_object() {
                for field in fields {
                    if let Some(value) = map.get(*field) {
                        out.insert((*field).to_owned(), value.clone());
                    }
                }
            }
            Value::Object(out)
        }
    }
}

fn doc_to_span(doc: &Value) -> Result<Span, StoreError> {
    serde_json::from_value(doc.clone())
        .map_err(|e| StoreError::Request(format!("undecodable span document: {e}")))
}

#[async_trait]
impl SpanStore for MemorySpanStore {
    async fn bulk_insert(&self, tenant: Uuid, spans: &[Span]) -> Result<(), StoreError> {
        self.check_online()?;
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        let mut docs = self.docs.lock().unwrap();
        for span in spans {
            let mut doc = serde_json::to_value(span)
                .map_err(|e| StoreError::Request(e.to_string()))?;
            doc["tenant"] = serde_json::json!(tenant);
            docs.insert((tenant, span.id.clone()), doc);
        }
        Ok(())
    }

    async fn get_by_id(
        &self,
        tenant: Uuid,
        id: &str,
        source_includes: Option<&[&str]>,
    ) -> Result<Option<Span>, StoreError> {
        self.check_online()?;
        let docs = self.docs.lock().unwrap();
        match docs.get(&(tenant, id.to_owned())) {
            Some(doc) => doc_to_span(&project(doc, source_includes)).map(Some),
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        tenant: Uuid,
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        self.check_online()?;
        let docs = self.docs.lock().unwrap();
        // Key order gives a stable id-ascending sort, which is the only
        // ordering the pipeline asks for
        let matched: Vec<&Value> = docs
            .iter()
            .filter(|((t, _), _)| *t == tenant)
            .map(|(_, doc)| doc)
            .filter(|doc| request.query.matches(doc))
            .collect();
        let total = matched.len() as u64;

        let includes: Option<Vec<&str>> = if request.source_includes.is_empty() {
            None
        } else {
            Some(request.source_includes.iter().map(String::as_str).collect())
        };
        let mut hits = Vec::new();
        for doc in matched.into_iter().skip(request.offset).take(request.limit) {
            hits.push(doc_to_span(&project(doc, includes.as_deref()))?);
        }
        Ok(SearchResponse { hits, total })
    }

    async fn update_partial(
        &self,
        tenant: Uuid,
        id: &str,
        patch: &Value,
    ) -> Result<Option<Span>, StoreError> {
        self.check_online()?;
        let mut docs = self.docs.lock().unwrap();
        let Some(doc) = docs.get_mut(&(tenant, id.to_owned())) else {
            return Ok(None);
        };
        if let (Some(doc_map), Some(patch_map)) = (doc.as_object_mut(), patch.as_object()) {
            for (key, value) in patch_map {
                doc_map.insert(key.clone(), value.clone());
            }
        }
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        doc_to_span(doc).map(Some)
    }

    async fn delete_by_ids(&self, tenant: Uuid, ids: &[String]) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut docs = self.docs.lock().unwrap();
        let before = docs.len();
        docs.retain(|(t, id), _| *t != tenant || !ids.contains(id));
        Ok((before - docs.len()) as u64)
    }

    async fn delete_by_traces(&self, tenant: Uuid, traces: &[String]) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut docs = self.docs.lock().unwrap();
        let before = docs.len();
        docs.retain(|(t, _), doc| {
            *t != tenant
                || !doc
                    .get("trace")
                    .and_then(Value::as_str)
                    .is_some_and(|trace| traces.iter().any(|candidate| candidate == trace))
        });
        Ok((before - docs.len()) as u64)
    }
}

// ============================================================================
// MemoryCounterStore
// ============================================================================

/// Counter store double with real bucket arithmetic.
#[derive(Default)]
pub struct MemoryCounterStore {
    admission: Mutex<HashMap<(Uuid, i64), i64>>,
    usage: Mutex<HashMap<(Uuid, i64), i64>>,
    /// When set, checks and records fail like a Redis outage.
    pub offline: AtomicBool,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total usage recorded for the tenant across buckets.
    #[must_use]
    pub fn usage_total(&self, tenant: Uuid) -> i64 {
        self.usage
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| *t == tenant)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Admission counter for the tenant's current bucket.
    #[must_use]
    pub fn admission_count(&self, tenant: Uuid, now_ms: i64) -> i64 {
        self.admission
            .lock()
            .unwrap()
            .get(&(tenant, hour_bucket(now_ms)))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn check(
        &self,
        tenant: Uuid,
        limit: i64,
        now_ms: i64,
    ) -> Result<LimitDecision, CounterError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CounterError::Unavailable("connection refused".into()));
        }
        let bucket = hour_bucket(now_ms);
        let mut counts = self.admission.lock().unwrap();
        let count = counts.entry((tenant, bucket)).or_insert(0);
        *count += 1;
        let remaining = limit - *count;
        Ok(LimitDecision {
            allowed: remaining >= 0,
            remaining,
            reset_at_ms: bucket_reset_ms(bucket),
        })
    }

    async fn record(&self, tenant: Uuid, n: i64, now_ms: i64) -> Result<(), CounterError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CounterError::Unavailable("connection refused".into()));
        }
        let bucket = hour_bucket(now_ms);
        *self.usage.lock().unwrap().entry((tenant, bucket)).or_insert(0) += n;
        Ok(())
    }
}

// ============================================================================
// MemoryMetaStore
// ============================================================================

/// Metadata store double: API keys, tenant limits, rate-limit events and
/// experiments in maps.
#[derive(Default)]
pub struct MemoryMetaStore {
    api_keys: Mutex<HashMap<String, ApiKeyRecord>>,
    tenant_limits: Mutex<HashMap<Uuid, i64>>,
    rate_limit_events: Mutex<Vec<(Uuid, DateTime<Utc>)>>,
    experiments: Mutex<HashMap<(Uuid, Uuid), Experiment>>,
}

impl MemoryMetaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plaintext API key for a tenant.
    pub fn add_api_key(&self, key: &str, tenant: Uuid, roles: &[&str]) {
        let hash = crate::auth::hash_api_key(key);
        self.api_keys.lock().unwrap().insert(
            hash.clone(),
            ApiKeyRecord {
                key_hash: hash,
                tenant,
                roles: roles.iter().map(|r| (*r).to_owned()).collect(),
                created_at: Utc::now(),
            },
        );
    }

    pub fn set_tenant_limit(&self, tenant: Uuid, limit: i64) {
        self.tenant_limits.lock().unwrap().insert(tenant, limit);
    }

    pub fn put_experiment(&self, experiment: Experiment) {
        self.experiments
            .lock()
            .unwrap()
            .insert((experiment.tenant, experiment.id), experiment);
    }

    #[must_use]
    pub fn experiment(&self, tenant: Uuid, id: Uuid) -> Option<Experiment> {
        self.experiments.lock().unwrap().get(&(tenant, id)).cloned()
    }

    /// Number of recorded rate-limit events for the tenant.
    #[must_use]
    pub fn rate_limit_event_count(&self, tenant: Uuid) -> usize {
        self.rate_limit_events
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == tenant)
            .count()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, MetaError> {
        Ok(self.api_keys.lock().unwrap().get(key_hash).cloned())
    }

    async fn tenant_rate_limit(&self, tenant: Uuid) -> Result<Option<i64>, MetaError> {
        Ok(self.tenant_limits.lock().unwrap().get(&tenant).copied())
    }

    async fn append_rate_limit_event(
        &self,
        tenant: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), MetaError> {
        self.rate_limit_events
            .lock()
            .unwrap()
            .push((tenant, occurred_at));
        Ok(())
    }

    async fn get_experiment(
        &self,
        id: Uuid,
        tenant: Uuid,
    ) -> Result<Option<Experiment>, MetaError> {
        Ok(self.experiments.lock().unwrap().get(&(tenant, id)).cloned())
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<(), MetaError> {
        self.experiments
            .lock()
            .unwrap()
            .insert((experiment.tenant, experiment.id), experiment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{QueryNode, SearchRequest};
    use serde_json::json;

    fn span(tenant: Uuid, id: &str, trace: &str) -> Span {
        Span {
            id: id.to_owned(),
            trace: trace.to_owned(),
            tenant: Some(tenant),
            name: "op".into(),
            ..Default::default()
        }
    }

    #[test]
    fn span_store_scopes_reads_to_the_tenant() {
        tokio_test::block_on(async {
            let store = MemorySpanStore::new();
            let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
            store.seed(alice, &span(alice, "s1", "t1"));

            assert!(store.get_by_id(alice, "s1", None).await.unwrap().is_some());
            assert!(store.get_by_id(bob, "s1", None).await.unwrap().is_none());

            let request = SearchRequest::new(QueryNode::term("trace", "t1"));
            assert_eq!(store.search(alice, &request).await.unwrap().total, 1);
            assert_eq!(store.search(bob, &request).await.unwrap().total, 0);
        });
    }

    #[test]
    fn span_store_projection_drops_unlisted_fields() {
        tokio_test::block_on(async {
            let store = MemorySpanStore::new();
            let tenant = Uuid::new_v4();
            let mut seeded = span(tenant, "s1", "t1");
            seeded
                .attributes
                .insert("inputTokens".into(), crate::model::AttrValue::Int(3));
            store.seed(tenant, &seeded);

            let projected = store
                .get_by_id(tenant, "s1", Some(&["id", "trace"]))
                .await
                .unwrap()
                .unwrap();
            assert!(projected.attributes.is_empty());
            assert_eq!(projected.id, "s1");
        });
    }

    #[test]
    fn span_store_merges_partial_updates_and_counts_them() {
        tokio_test::block_on(async {
            let store = MemorySpanStore::new();
            let tenant = Uuid::new_v4();
            store.seed(tenant, &span(tenant, "s1", "t1"));

            let updated = store
                .update_partial(tenant, "s1", &json!({"starred": true}))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(updated.starred, Some(true));
            assert_eq!(updated.name, "op");
            assert_eq!(store.update_calls.load(Ordering::SeqCst), 1);

            // Unknown document: no update, no count
            let missing = store
                .update_partial(tenant, "nope", &json!({"starred": true}))
                .await
                .unwrap();
            assert!(missing.is_none());
            assert_eq!(store.update_calls.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn counter_store_tracks_buckets_and_fails_when_offline() {
        tokio_test::block_on(async {
            let counter = MemoryCounterStore::new();
            let tenant = Uuid::new_v4();
            let now_ms = 1_700_000_000_000;

            let first = counter.check(tenant, 1, now_ms).await.unwrap();
            assert!(first.allowed);
            assert_eq!(first.remaining, 0);
            let second = counter.check(tenant, 1, now_ms).await.unwrap();
            assert!(!second.allowed);

            counter.record(tenant, 5, now_ms).await.unwrap();
            assert_eq!(counter.usage_total(tenant), 5);

            counter.offline.store(true, Ordering::SeqCst);
            assert!(counter.check(tenant, 1, now_ms).await.is_err());
            assert!(counter.record(tenant, 1, now_ms).await.is_err());
        });
    }
}
