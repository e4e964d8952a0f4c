//! Admission control for ingest requests.
//!
//! A fixed hourly window per tenant over a shared counter store. The
//! admission decision is coarse (one count per request); usage attribution
//! is separate (one count per span, recorded after persistence), so the two
//! never interfere.

mod limiter;

pub use limiter::RedisCounterStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::MetaStore;

/// Window length of one admission bucket.
pub const WINDOW_SECS: i64 = 3600;
const WINDOW_MS: i64 = WINDOW_SECS * 1000;

/// Hourly allowance applied when a tenant has no configured limit.
pub const DEFAULT_RATE_LIMIT_PER_HOUR: i64 = 1000;

/// The hour bucket a millisecond timestamp falls into.
#[must_use]
pub const fn hour_bucket(now_ms: i64) -> i64 {
    now_ms.div_euclid(WINDOW_MS)
}

/// When the given bucket's window resets, in epoch milliseconds.
#[must_use]
pub const fn bucket_reset_ms(bucket: i64) -> i64 {
    (bucket + 1) * WINDOW_MS
}

/// Counter store failures. Both make the admission decision undecidable,
/// which the endpoint resolves by admitting (fail-open).
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store timed out")]
    Timeout,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitDecision {
    pub allowed: bool,
    /// Requests left in the window after this one. Zero still admits;
    /// negative does not.
    pub remaining: i64,
    /// When the current window resets, epoch milliseconds.
    pub reset_at_ms: i64,
}

/// Contract over the shared counter store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count this request against the tenant's current hour bucket and
    /// decide admission against `limit`.
    async fn check(
        &self,
        tenant: Uuid,
        limit: i64,
        now_ms: i64,
    ) -> Result<LimitDecision, CounterError>;

    /// Bump the tenant's usage counter by `n` spans.
    async fn record(&self, tenant: Uuid, n: i64, now_ms: i64) -> Result<(), CounterError>;
}

/// What the endpoint should do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected {
        /// Seconds the client should wait, for the `Retry-After` header.
        retry_after_secs: i64,
    },
}

/// Ties the counter store to tenant limits and the durable rejection log.
#[derive(Clone)]
pub struct AdmissionController {
    counter: Option<Arc<dyn CounterStore>>,
    meta: Arc<dyn MetaStore>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(counter: Option<Arc<dyn CounterStore>>, meta: Arc<dyn MetaStore>) -> Self {
        Self { counter, meta }
    }

    /// Decide admission for one request.
    ///
    /// Undecidable outcomes (no counter store configured, store error or
    /// timeout) admit the request. A rejection appends a rate-limit event;
    /// that write is fire-and-forget and never delays the response.
    pub async fn admit(&self, tenant: Uuid, now_ms: i64) -> Admission {
        let Some(counter) = &self.counter else {
            return Admission::Allowed;
        };

        let limit = match self.meta.tenant_rate_limit(tenant).await {
            Ok(limit) => limit.unwrap_or(DEFAULT_RATE_LIMIT_PER_HOUR),
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Tenant limit lookup failed, using default");
                DEFAULT_RATE_LIMIT_PER_HOUR
            }
        };

        match counter.check(tenant, limit, now_ms).await {
            Ok(decision) if decision.allowed => Admission::Allowed,
            Ok(decision) => {
                debug!(
                    tenant = %tenant,
                    remaining = decision.remaining,
                    "Ingest request rejected by rate limit"
                );
                self.log_rejection(tenant, now_ms);
                let retry_after_secs = ((decision.reset_at_ms - now_ms).max(0) as u64)
                    .div_ceil(1000)
                    .max(1) as i64;
                Admission::Rejected { retry_after_secs }
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Admission undecidable, failing open");
                Admission::Allowed
            }
        }
    }

    /// Attribute `spans` ingested spans to the tenant's usage counter.
    /// Fire-and-forget; a counter outage silently skips usage recording.
    pub fn record_usage(&self, tenant: Uuid, spans: usize, now_ms: i64) {
        let Some(counter) = &self.counter else {
            return;
        };
        let counter = Arc::clone(counter);
        tokio::spawn(async move {
            if let Err(e) = counter.record(tenant, spans as i64, now_ms).await {
                warn!(tenant = %tenant, error = %e, "Usage recording skipped");
            }
        });
    }

    fn log_rejection(&self, tenant: Uuid, now_ms: i64) {
        let meta = Arc::clone(&self.meta);
        let occurred_at = Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(Utc::now);
        tokio::spawn(async move {
            if let Err(e) = meta.append_rate_limit_event(tenant, occurred_at).await {
                warn!(tenant = %tenant, error = %e, "Failed to append rate-limit event");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_and_resets_align_to_the_hour() {
        let now_ms = 1_700_000_000_123; // 2023-11-14T22:13:20.123Z
        let bucket = hour_bucket(now_ms);
        assert_eq!(bucket, 1_700_000_000_123 / 3_600_000);
        let reset = bucket_reset_ms(bucket);
        assert!(reset > now_ms);
        assert!(reset - now_ms <= WINDOW_MS);
        assert_eq!(reset % WINDOW_MS, 0);
    }

    #[test]
    fn adjacent_hours_use_distinct_buckets() {
        let t = 1_700_000_000_000;
        assert_eq!(hour_bucket(t), hour_bucket(t + 1));
        assert_ne!(hour_bucket(t), hour_bucket(t + WINDOW_MS));
    }
}
