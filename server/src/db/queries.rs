//! Runtime queries (no compile-time `DATABASE_URL` required).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::models::{ApiKeyRecord, Experiment, ExperimentResult};
use super::{MetaError, MetaStore};

/// Row shape for `experiments`, with JSONB columns wrapped for sqlx.
#[derive(Debug, FromRow)]
struct ExperimentRow {
    id: Uuid,
    tenant: Uuid,
    dataset: Option<String>,
    parameters: Json<serde_json::Value>,
    results: Json<Vec<ExperimentResult>>,
    summaries: Json<serde_json::Value>,
}

impl From<ExperimentRow> for Experiment {
    fn from(row: ExperimentRow) -> Self {
        Self {
            id: row.id,
            tenant: row.tenant,
            dataset: row.dataset,
            parameters: row.parameters.0,
            results: row.results.0,
            summaries: row.summaries.0,
        }
    }
}

/// `PostgreSQL`-backed [`MetaStore`].
#[derive(Debug, Clone)]
pub struct PgMetaStore {
    pool: PgPool,
}

impl PgMetaStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetaStore for PgMetaStore {
    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, MetaError> {
        let record = sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT key_hash, tenant, roles, created_at FROM api_keys WHERE key_hash = $1",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn tenant_rate_limit(&self, tenant: Uuid) -> Result<Option<i64>, MetaError> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT rate_limit_per_hour FROM tenants WHERE id = $1")
                .bind(tenant)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(limit,)| limit))
    }

    async fn append_rate_limit_event(
        &self,
        tenant: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), MetaError> {
        sqlx::query("INSERT INTO rate_limit_events (tenant, occurred_at) VALUES ($1, $2)")
            .bind(tenant)
            .bind(occurred_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_experiment(
        &self,
        id: Uuid,
        tenant: Uuid,
    ) -> Result<Option<Experiment>, MetaError> {
        let row = sqlx::query_as::<_, ExperimentRow>(
            "SELECT id, tenant, dataset, parameters, results, summaries \
             FROM experiments WHERE id = $1 AND tenant = $2",
        )
        .bind(id)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Experiment::from))
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<(), MetaError> {
        sqlx::query(
            "UPDATE experiments SET results = $3, summaries = $4 \
             WHERE id = $1 AND tenant = $2",
        )
        .bind(experiment.id)
        .bind(experiment.tenant)
        .bind(Json(&experiment.results))
        .bind(Json(&experiment.summaries))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
