//! Single-call API
//!
//! Every call is a one-operation [`Pipeline`] run through the same recovery
//! protocol, so a single call and a queued operation behave identically.

use crate::error::{Error, Result};
use crate::executor::{self, Batch};
use crate::pipeline::Pipeline;
use crate::reply::check_error;
use crate::scripts::Scripts;
use crate::store::{Cmd, Connection, Value};
use crate::types::{ConcurrencyLimit, ConcurrencyResult, Limit, RateResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Key namespaces, fixed for the lifetime of a [`Limiter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Prefix of rate state keys
    pub rate_prefix: String,
    /// Prefix of lease hash keys
    pub concurrency_prefix: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate_prefix: "rate:".to_string(),
            concurrency_prefix: "concurrency:".to_string(),
        }
    }
}

/// Distributed rate and concurrency limiter
///
/// Cheap to clone; clones share the connection and the procedure registry.
///
/// ```
/// use redrate::memory::MemoryStore;
/// use redrate::{ConcurrencyLimit, Limit, Limiter};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let limiter = Limiter::with_defaults(MemoryStore::new());
///
/// let res = limiter.allow_n("user:7", Limit::per_minute(60), 5).await.unwrap();
/// assert_eq!(res.allowed, 5);
/// assert_eq!(res.remaining, 55);
///
/// let limit = ConcurrencyLimit::new(1, Duration::from_secs(30));
/// let lease = limiter.take("reports", "req-1", limit).await.unwrap();
/// assert!(lease.allowed);
/// limiter.release("reports", "req-1").await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct Limiter {
    conn: Arc<dyn Connection>,
    scripts: Arc<Scripts>,
    config: Arc<LimiterConfig>,
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Limiter {
    pub fn new<C: Connection + 'static>(conn: C, config: LimiterConfig) -> Self {
        Self {
            conn: Arc::new(conn),
            scripts: Arc::new(Scripts::new()),
            config: Arc::new(config),
        }
    }

    pub fn with_defaults<C: Connection + 'static>(conn: C) -> Self {
        Self::new(conn, LimiterConfig::default())
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn scripts(&self) -> &Scripts {
        &self.scripts
    }

    pub(crate) fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }

    /// Start a batch of operations
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.clone())
    }

    /// Admit one event under `limit`
    pub async fn allow(&self, key: &str, limit: Limit) -> Result<RateResult> {
        self.allow_n(key, limit, 1).await
    }

    /// Admit exactly `n` events or none
    pub async fn allow_n(&self, key: &str, limit: Limit, n: i64) -> Result<RateResult> {
        let mut pipe = self.pipeline();
        pipe.allow_n(key, limit, n);
        single(pipe.run().await?.rates)
    }

    /// Admit as many of `n` events as the bucket currently allows
    pub async fn allow_at_most(&self, key: &str, limit: Limit, n: i64) -> Result<RateResult> {
        let mut pipe = self.pipeline();
        pipe.allow_at_most(key, limit, n);
        single(pipe.run().await?.rates)
    }

    /// Acquire or refresh the lease of `request_id` on `key`
    pub async fn take(
        &self,
        key: &str,
        request_id: &str,
        limit: ConcurrencyLimit,
    ) -> Result<ConcurrencyResult> {
        let mut pipe = self.pipeline();
        pipe.take(key, request_id, limit);
        single(pipe.run().await?.takes)
    }

    /// Acquire leases for `request_id` on several keys in one round trip
    ///
    /// Each key is decided independently. Results are keyed by logical key.
    pub async fn take_multi(
        &self,
        request_id: &str,
        keys: &[(&str, ConcurrencyLimit)],
    ) -> Result<HashMap<String, ConcurrencyResult>> {
        let mut pipe = self.pipeline();
        for (key, limit) in keys {
            pipe.take(key, request_id, *limit);
        }
        let outcomes = pipe.run().await?;
        Ok(outcomes
            .takes
            .into_iter()
            .map(|res| (res.key.clone(), res))
            .collect())
    }

    /// Release the lease of `request_id` on `key`
    pub async fn release(&self, key: &str, request_id: &str) -> Result<()> {
        self.release_multi(request_id, &[key]).await
    }

    /// Release the leases of `request_id` on several keys in one round trip
    pub async fn release_multi(&self, request_id: &str, keys: &[&str]) -> Result<()> {
        let mut pipe = self.pipeline();
        for key in keys {
            pipe.release(key, request_id);
        }
        pipe.run().await.map(|_| ())
    }

    /// Forget all rate state of `key`; the next check sees a full bucket
    pub async fn reset(&self, key: &str) -> Result<()> {
        let mut batch = Batch::new();
        batch.push(
            None,
            Cmd::new("DEL").arg(format!("{}{}", self.config.rate_prefix, key)),
        );
        let replies = executor::execute(self.connection(), &self.scripts, &batch).await?;
        for reply in &replies {
            check_error(reply)?;
        }
        Ok(())
    }

    /// Register all procedures with the store ahead of the first call
    pub async fn load_scripts(&self) -> Result<()> {
        self.scripts.load(self.connection()).await
    }

    /// Round trip a `PING`
    pub async fn ping(&self) -> Result<()> {
        let replies = self.conn.pipeline(&[Cmd::new("PING")]).await?;
        match replies.as_slice() {
            [Value::Status(s)] | [Value::Data(s)] if s.eq_ignore_ascii_case("PONG") => Ok(()),
            [Value::Error(msg)] => Err(Error::Command(msg.clone())),
            other => Err(Error::MalformedReply(format!(
                "PING: unexpected reply {other:?}"
            ))),
        }
    }
}

fn single<T>(results: Vec<T>) -> Result<T> {
    results
        .into_iter()
        .next()
        .ok_or_else(|| Error::MalformedReply("missing result for single call".to_string()))
}
