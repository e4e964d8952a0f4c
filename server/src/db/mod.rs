//! Metadata store.
//!
//! `PostgreSQL` holds everything that is not a span: tenant accounts, API
//! keys, experiments, and the append-only rate-limit event log. The core
//! consumes it through the [`MetaStore`] contract so the pipeline can run
//! against the in-memory double in tests.

mod models;
mod queries;

pub use models::*;
pub use queries::PgMetaStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Open the `PostgreSQL` pool behind the metadata store.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;

    info!("Metadata store connected");
    Ok(pool)
}

/// Bring the metadata schema up to date.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Metadata schema migrated");
    Ok(())
}

/// Connect the Redis client that backs the admission and usage counters.
pub async fn create_redis_client(redis_url: &str) -> Result<fred::clients::Client> {
    use fred::interfaces::ClientLike;

    let config = fred::types::config::Config::from_url(redis_url)?;
    let client = fred::clients::Client::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await?;

    info!("Counter-store Redis connected");
    Ok(client)
}

/// Metadata store failures.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("metadata store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Contract over the metadata store consumed by the ingest pipeline.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Resolve an API key digest to its record.
    async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, MetaError>;

    /// The tenant's configured hourly ingest limit, if any.
    async fn tenant_rate_limit(&self, tenant: Uuid) -> Result<Option<i64>, MetaError>;

    /// Durably append one admission-rejection event.
    async fn append_rate_limit_event(
        &self,
        tenant: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), MetaError>;

    /// Fetch an experiment owned by the tenant.
    async fn get_experiment(&self, id: Uuid, tenant: Uuid)
        -> Result<Option<Experiment>, MetaError>;

    /// Persist updated experiment results and summaries.
    async fn update_experiment(&self, experiment: &Experiment) -> Result<(), MetaError>;
}
