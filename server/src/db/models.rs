//! Metadata models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A tenant account. The core only consumes `rate_limit_per_hour`; the rest
/// belongs to the external account-management surface.
#[derive(Debug, Clone, FromRow)]
pub struct TenantAccount {
    pub id: Uuid,
    pub name: String,
    /// Hourly ingest allowance; `None` falls back to the server default.
    pub rate_limit_per_hour: Option<i64>,
    pub subscription_tier: String,
    pub created_at: DateTime<Utc>,
}

/// An API key record. Only the SHA-256 digest of the key is stored.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRecord {
    pub key_hash: String,
    pub tenant: Uuid,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One result row of an experiment: the scores recorded for one example run,
/// linked to the trace that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub trace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<i64>,
}

/// An offline experiment with its accumulated result rows and summaries.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub id: Uuid,
    pub tenant: Uuid,
    pub dataset: Option<String>,
    pub parameters: serde_json::Value,
    pub results: Vec<ExperimentResult>,
    pub summaries: serde_json::Value,
}
