//! Internal span data model.
//!
//! The decoder normalises both OTLP encodings into these records; the
//! propagator, the cost attributor, and the span store all operate on them.
//! Wire names are camelCase to match the document-store representation.

mod attr;
mod stats;

pub use attr::AttrValue;
pub use stats::SpanStats;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved attribute key promoted to [`Span::example`] at decode time.
pub const EXAMPLE_KEY: &str = "example";
/// Reserved attribute key promoted to [`Span::experiment`] at decode time.
pub const EXPERIMENT_KEY: &str = "experiment";

/// Span status per the OTLP model: 0 unset, 1 ok, 2 error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status code for an errored span.
pub const STATUS_CODE_ERROR: i32 = 2;

impl SpanStatus {
    /// Whether this status marks the span as failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.code == STATUS_CODE_ERROR
    }
}

/// A timestamped event attached to a span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEvent {
    pub name: String,
    /// Event time in epoch milliseconds.
    #[serde(default)]
    pub time_ms: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
}

/// A link to a span in this or another trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanLink {
    #[serde(default)]
    pub trace: String,
    #[serde(default)]
    pub span: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
}

/// The resource that produced a batch of spans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
}

/// Name/version of the instrumentation library that emitted the span.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationScope {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A single span as stored and propagated.
///
/// Identity, timing, `trace` and `parent` are immutable once written; the
/// only legal mutations are the initial insert, `stats`/`_childStats` updates
/// during propagation, and explicit marker updates (`starred`, `tags`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Span id, hex, unique within the tenant.
    pub id: String,
    /// Trace id, hex.
    pub trace: String,
    /// Parent span id; absent means this span is a trace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Owning tenant, attached at ingest after authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Uuid>,

    #[serde(default)]
    pub name: String,
    /// OTLP span kind, 0-5.
    #[serde(default)]
    pub kind: i32,
    #[serde(default)]
    pub status: SpanStatus,

    /// Start time, epoch milliseconds.
    #[serde(default)]
    pub start: i64,
    /// End time, epoch milliseconds. Equal to `start` for in-progress spans.
    #[serde(default)]
    pub end: i64,
    /// `end - start`; filled at ingest. May be negative, consumers are not
    /// protected from `end < start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// False when the export carried no end timestamp.
    #[serde(default = "default_true")]
    pub ended: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<SpanLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    #[serde(
        rename = "instrumentationScope",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub scope: Option<InstrumentationScope>,

    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub dropped_attributes_count: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub dropped_events_count: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub dropped_links_count: u32,

    /// Subtree statistics: own contribution plus all known children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<SpanStats>,
    /// Last-known subtree stats per direct child, keyed by child span id.
    /// Absent on leaves. This map is what keeps late-arriving batches from
    /// double counting an already-aggregated subtree.
    #[serde(
        rename = "_childStats",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub child_stats: Option<BTreeMap<String, SpanStats>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Dataset example this span was produced from, promoted from attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    /// Experiment this span belongs to, promoted from attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<String>,
}

const fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl Span {
    /// Whether the span refers to a parent within its trace.
    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.parent.as_deref().is_some_and(|p| !p.is_empty())
    }
}
