//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use fred::clients::Client;
use fred::interfaces::LuaInterface;
use tracing::debug;
use uuid::Uuid;

use super::{
    bucket_reset_ms, hour_bucket, CounterError, CounterStore, LimitDecision, WINDOW_SECS,
};

/// Embedded Lua script for atomic increment-with-expiry.
const COUNTER_SCRIPT: &str = include_str!("rate_limit.lua");

/// Deadline on counter-store calls. Admission must never hold a request for
/// long: past this, the decision is undecidable and the endpoint fails open.
const COMMAND_TIMEOUT: Duration = Duration::from_millis(300);

/// Counter store backed by Redis.
///
/// Keys are scoped to `(tenant, hour bucket)` and expire on their own after
/// the window, so the store cleans up behind itself.
#[derive(Clone)]
pub struct RedisCounterStore {
    redis: Client,
    key_prefix: String,
    script_sha: String,
}

impl RedisCounterStore {
    /// Creates a new counter store.
    ///
    /// Call `init()` after creation to load the Lua script into Redis.
    #[must_use]
    pub fn new(redis: Client, key_prefix: &str) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.to_owned(),
            script_sha: String::new(),
        }
    }

    /// Loads the Lua script into Redis. Must be called before use.
    pub async fn init(&mut self) -> Result<(), fred::error::Error> {
        let sha: String = self.redis.script_load(COUNTER_SCRIPT).await?;
        debug!(script_sha = %sha, "Counter Lua script loaded");
        self.script_sha = sha;
        Ok(())
    }

    fn admission_key(&self, tenant: Uuid, bucket: i64) -> String {
        format!("{}:admission:{}:{}", self.key_prefix, tenant, bucket)
    }

    fn usage_key(&self, tenant: Uuid, bucket: i64) -> String {
        format!("{}:usage:{}:{}", self.key_prefix, tenant, bucket)
    }

    /// Run the counter script against one key with a bounded deadline.
    async fn bump(&self, key: &str, amount: i64) -> Result<i64, CounterError> {
        let call = self.redis.evalsha::<i64, _, _, _>(
            &self.script_sha,
            vec![key],
            vec![amount.to_string(), WINDOW_SECS.to_string()],
        );
        match tokio::time::timeout(COMMAND_TIMEOUT, call).await {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(e)) => Err(CounterError::Unavailable(e.to_string())),
            Err(_) => Err(CounterError::Timeout),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    #[tracing::instrument(skip(self))]
    async fn check(
        &self,
        tenant: Uuid,
        limit: i64,
        now_ms: i64,
    ) -> Result<LimitDecision, CounterError> {
        let bucket = hour_bucket(now_ms);
        let count = self.bump(&self.admission_key(tenant, bucket), 1).await?;
        let remaining = limit - count;
        Ok(LimitDecision {
            allowed: remaining >= 0,
            remaining,
            reset_at_ms: bucket_reset_ms(bucket),
        })
    }

    async fn record(&self, tenant: Uuid, n: i64, now_ms: i64) -> Result<(), CounterError> {
        if n <= 0 {
            return Ok(());
        }
        let bucket = hour_bucket(now_ms);
        self.bump(&self.usage_key(tenant, bucket), n).await?;
        Ok(())
    }
}
