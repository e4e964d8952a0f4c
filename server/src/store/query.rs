//! Structured boolean queries.
//!
//! The pipeline only ever needs equality terms composed with AND/OR over
//! span fields (`id`, `parent`, `trace`, nested attribute paths), so queries
//! are built as a small tree and rendered to the store's query DSL at the
//! adapter boundary.

use serde_json::{json, Value};

/// One node of a boolean query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Field equals value.
    Term { field: String, value: Value },
    /// Field equals any of the values.
    Terms { field: String, values: Vec<Value> },
    /// Every child matches.
    And(Vec<QueryNode>),
    /// At least one child matches.
    Or(Vec<QueryNode>),
}

impl QueryNode {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Render to the Elasticsearch query DSL.
    #[must_use]
    pub fn to_es(&self) -> Value {
        match self {
            Self::Term { field, value } => json!({ "term": { field.clone(): value } }),
            Self::Terms { field, values } => json!({ "terms": { field.clone(): values } }),
            Self::And(children) => json!({
                "bool": { "filter": children.iter().map(Self::to_es).collect::<Vec<_>>() }
            }),
            Self::Or(children) => json!({
                "bool": {
                    "should": children.iter().map(Self::to_es).collect::<Vec<_>>(),
                    "minimum_should_match": 1
                }
            }),
        }
    }

    /// Evaluate against a flattened JSON document. Dotted field names walk
    /// nested objects; array and object leaf values never match equality
    /// terms. Used by the in-memory store double.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::Term { field, value } => field_value(doc, field) == Some(value),
            Self::Terms { field, values } => {
                field_value(doc, field).is_some_and(|v| values.iter().any(|c| c == v))
            }
            Self::And(children) => children.iter().all(|c| c.matches(doc)),
            Self::Or(children) => children.iter().any(|c| c.matches(doc)),
        }
    }
}

/// Resolve a dotted path against a JSON object, preferring the literal key
/// (attribute names contain dots) before walking segments.
fn field_value<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    if let Some(direct) = doc.get(field) {
        return scalar(direct);
    }
    let mut current = doc;
    let mut rest = field;
    while let Some((head, tail)) = rest.split_once('.') {
        // Longest-literal match first: "attributes.cost.usd" resolves
        // "attributes" then the literal key "cost.usd".
        current = current.get(head)?;
        if let Some(direct) = current.get(tail) {
            return scalar(direct);
        }
        rest = tail;
    }
    scalar(current.get(rest)?)
}

fn scalar(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(_) | Value::Object(_) => None,
        _ => Some(value),
    }
}
