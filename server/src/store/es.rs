//! Elasticsearch adapter for the span store.
//!
//! Documents are keyed by span id in one index per tenant
//! (`{prefix}-{tenant}`), which keeps the mandatory tenant scope structural:
//! a request can only ever touch the index derived from the authenticated
//! tenant.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::query::QueryNode;
use super::{SearchRequest, SearchResponse, SortOrder, SpanStore, StoreError};
use crate::model::Span;

/// Deadline on every span-store request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reqwest-based client for an Elasticsearch-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct EsSpanStore {
    client: reqwest::Client,
    base_url: String,
    index_prefix: String,
}

impl EsSpanStore {
    pub fn new(base_url: &str, index_prefix: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            index_prefix: index_prefix.to_owned(),
        })
    }

    fn index(&self, tenant: Uuid) -> String {
        format!("{}-{}", self.index_prefix, tenant)
    }

    /// Verify the cluster answers at all.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(format!("{}/_cluster/health", self.base_url))
            .send()
            .await
            .map_err(map_transport)?;
        ok_status(response).await.map(|_| ())
    }

    /// Install the index template that maps span identity fields as
    /// keywords, so term queries on `id`/`parent`/`trace` behave. Safe to
    /// call on every startup.
    pub async fn ensure_index_template(&self) -> Result<(), StoreError> {
        let body = json!({
            "index_patterns": [format!("{}-*", self.index_prefix)],
            "template": {
                "mappings": {
                    "dynamic_templates": [
                        {"strings_as_keywords": {
                            "match_mapping_type": "string",
                            "mapping": {"type": "keyword", "ignore_above": 1024}
                        }}
                    ],
                    "properties": {
                        "id": {"type": "keyword"},
                        "parent": {"type": "keyword"},
                        "trace": {"type": "keyword"},
                        "tenant": {"type": "keyword"},
                        "name": {"type": "text"},
                        "start": {"type": "long"},
                        "end": {"type": "long"}
                    }
                }
            }
        });
        let response = self
            .client
            .put(format!("{}/_index_template/{}", self.base_url, self.index_prefix))
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        ok_status(response).await.map(|_| ())
    }
}

fn map_transport(error: reqwest::Error) -> StoreError {
    if error.is_connect() || error.is_timeout() {
        StoreError::Unavailable(error.to_string())
    } else {
        StoreError::Request(error.to_string())
    }
}

/// Treat 5xx as the store being down, other failures as request errors.
async fn ok_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(StoreError::Unavailable(format!("{status}: {body}")))
    } else {
        Err(StoreError::Request(format!("{status}: {body}")))
    }
}

fn parse_source(source: &Value) -> Result<Span, StoreError> {
    serde_json::from_value(source.clone())
        .map_err(|e| StoreError::Request(format!("undecodable span document: {e}")))
}

#[async_trait]
impl SpanStore for EsSpanStore {
    async fn bulk_insert(&self, tenant: Uuid, spans: &[Span]) -> Result<(), StoreError> {
        if spans.is_empty() {
            return Ok(());
        }
        let index = self.index(tenant);
        let mut body = String::new();
        for span in spans {
            let mut doc = serde_json::to_value(span)
                .map_err(|e| StoreError::Request(e.to_string()))?;
            // The tenant rides on every document as well as the index name
            doc["tenant"] = json!(tenant);
            body.push_str(&json!({"index": {"_index": index, "_id": span.id}}).to_string());
            body.push('\n');
            body.push_str(&doc.to_string());
            body.push('\n');
        }

        let response = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.base_url))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(map_transport)?;
        let response = ok_status(response).await?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        if parsed["errors"].as_bool() == Some(true) {
            return Err(StoreError::Request(format!(
                "bulk insert reported item errors: {}",
                first_bulk_error(&parsed)
            )));
        }
        debug!(count = spans.len(), index = %index, "Bulk-inserted spans");
        Ok(())
    }

    async fn get_by_id(
        &self,
        tenant: Uuid,
        id: &str,
        source_includes: Option<&[&str]>,
    ) -> Result<Option<Span>, StoreError> {
        let mut url = format!("{}/{}/_doc/{}", self.base_url, self.index(tenant), id);
        if let Some(fields) = source_includes {
            url.push_str("?_source_includes=");
            url.push_str(&fields.join(","));
        }
        let response = self.client.get(url).send().await.map_err(map_transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ok_status(response).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        if parsed["found"].as_bool() != Some(true) {
            return Ok(None);
        }
        parse_source(&parsed["_source"]).map(Some)
    }

    async fn search(
        &self,
        tenant: Uuid,
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        // Tenant term is redundant with the per-tenant index but mandatory
        // on every operation
        let query = QueryNode::And(vec![
            QueryNode::term("tenant", tenant.to_string()),
            request.query.clone(),
        ]);
        let mut body = json!({
            "query": query.to_es(),
            "from": request.offset,
            "size": request.limit,
        });
        if let Some((field, order)) = &request.sort {
            let dir = match order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            body["sort"] = json!([{field.clone(): {"order": dir}}]);
        }
        if !request.source_includes.is_empty() || !request.source_excludes.is_empty() {
            body["_source"] = json!({
                "includes": request.source_includes,
                "excludes": request.source_excludes,
            });
        }

        let response = self
            .client
            .post(format!("{}/{}/_search", self.base_url, self.index(tenant)))
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // The tenant has no index yet, which is just an empty result
            return Ok(SearchResponse::default());
        }
        let response = ok_status(response).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let total = parsed["hits"]["total"]["value"].as_u64().unwrap_or(0);
        let mut hits = Vec::new();
        if let Some(raw_hits) = parsed["hits"]["hits"].as_array() {
            for hit in raw_hits {
                hits.push(parse_source(&hit["_source"])?);
            }
        }
        Ok(SearchResponse { hits, total })
    }

    async fn update_partial(
        &self,
        tenant: Uuid,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<Option<Span>, StoreError> {
        let response = self
            .client
            .post(format!(
                "{}/{}/_update/{}?refresh=true&_source=true",
                self.base_url,
                self.index(tenant),
                id
            ))
            .json(&json!({ "doc": patch }))
            .send()
            .await
            .map_err(map_transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ok_status(response).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let source = &parsed["get"]["_source"];
        if source.is_null() {
            warn!(span = %id, "Update acknowledged without source, re-fetching");
            return self.get_by_id(tenant, id, None).await;
        }
        parse_source(source).map(Some)
    }

    async fn delete_by_ids(&self, tenant: Uuid, ids: &[String]) -> Result<u64, StoreError> {
        self.delete_by_query(tenant, QueryNode::terms("id", ids.iter().cloned()))
            .await
    }

    async fn delete_by_traces(&self, tenant: Uuid, traces: &[String]) -> Result<u64, StoreError> {
        self.delete_by_query(tenant, QueryNode::terms("trace", traces.iter().cloned()))
            .await
    }
}

impl EsSpanStore {
    async fn delete_by_query(&self, tenant: Uuid, node: QueryNode) -> Result<u64, StoreError> {
        let query = QueryNode::And(vec![
            QueryNode::term("tenant", tenant.to_string()),
            node,
        ]);
        let response = self
            .client
            .post(format!(
                "{}/{}/_delete_by_query?refresh=true",
                self.base_url,
                self.index(tenant)
            ))
            .json(&json!({"query": query.to_es()}))
            .send()
            .await
            .map_err(map_transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let response = ok_status(response).await?;
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(parsed["deleted"].as_u64().unwrap_or(0))
    }
}

fn first_bulk_error(parsed: &Value) -> String {
    parsed["items"]
        .as_array()
        .into_iter()
        .flatten()
        .find_map(|item| {
            let error = &item["index"]["error"];
            (!error.is_null()).then(|| error.to_string())
        })
        .unwrap_or_else(|| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_name_embeds_prefix_and_tenant() {
        let store = EsSpanStore::new("http://localhost:9200/", "spans").unwrap();
        let tenant = Uuid::nil();
        assert_eq!(
            store.index(tenant),
            format!("spans-{tenant}")
        );
        assert_eq!(store.base_url, "http://localhost:9200");
    }

    #[test]
    fn first_bulk_error_extracts_item_failures() {
        let parsed = json!({
            "errors": true,
            "items": [
                {"index": {"status": 200}},
                {"index": {"status": 400, "error": {"type": "mapper_parsing_exception"}}}
            ]
        });
        assert!(first_bulk_error(&parsed).contains("mapper_parsing_exception"));
    }
}
