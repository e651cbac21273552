//! Queued operations executed in one round trip
//!
//! A [`Pipeline`] collects rate checks, lease takes and releases, then
//! [`exec`](Pipeline::exec) submits them together under the cache-miss
//! recovery protocol. Each queued check hands back a handle that is populated
//! only once the whole batch has succeeded.
//!
//! # Example
//!
//! ```
//! use redrate::memory::MemoryStore;
//! use redrate::{ConcurrencyLimit, Limit, Limiter};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let limiter = Limiter::with_defaults(MemoryStore::new());
//!
//! let mut pipe = limiter.pipeline();
//! let api = pipe.allow("api:user:1", Limit::per_second(5));
//! let upload = pipe.allow_at_most("upload:user:1", Limit::per_minute(3), 10);
//! let slot = pipe.take(
//!     "jobs",
//!     "req-1",
//!     ConcurrencyLimit::new(2, Duration::from_secs(30)),
//! );
//! assert!(!api.is_ready());
//!
//! pipe.exec().await.unwrap();
//!
//! assert_eq!(api.result().unwrap().allowed, 1);
//! assert_eq!(upload.result().unwrap().allowed, 3);
//! assert!(slot.result().unwrap().allowed);
//! # });
//! ```

use crate::deadline::with_deadline;
use crate::error::{Error, Result};
use crate::executor::{self, Batch};
use crate::limiter::Limiter;
use crate::reply::{RateReply, TakeReply, check_error};
use crate::scripts::ScriptKind;
use crate::store::Cmd;
use crate::types::{ConcurrencyLimit, ConcurrencyResult, Limit, RateResult};
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;

/// Write-once slot for a queued rate check
#[derive(Debug, Clone, Default)]
pub struct RateHandle {
    cell: Arc<OnceLock<RateResult>>,
}

/// Write-once slot for a queued lease take
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyHandle {
    cell: Arc<OnceLock<ConcurrencyResult>>,
}

macro_rules! handle_accessors {
    ($handle:ty, $result:ty) => {
        impl $handle {
            /// Whether the owning pipeline executed successfully
            pub fn is_ready(&self) -> bool {
                self.cell.get().is_some()
            }

            pub fn get(&self) -> Option<&$result> {
                self.cell.get()
            }

            /// A copy of the result, or [`Error::NotReady`]
            pub fn result(&self) -> Result<$result> {
                self.cell.get().cloned().ok_or(Error::NotReady)
            }

            fn publish(&self, result: $result) {
                // exec consumes the pipeline, so each cell is set at most once
                let _ = self.cell.set(result);
            }
        }
    };
}

handle_accessors!(RateHandle, RateResult);
handle_accessors!(ConcurrencyHandle, ConcurrencyResult);

#[derive(Debug)]
struct QueuedRate {
    kind: ScriptKind,
    key: String,
    limit: Limit,
    n: i64,
    handle: RateHandle,
}

#[derive(Debug)]
struct QueuedTake {
    key: String,
    request_id: String,
    limit: ConcurrencyLimit,
    handle: ConcurrencyHandle,
}

#[derive(Debug)]
struct QueuedRelease {
    key: String,
    request_id: String,
}

/// Decoded results of a successful run, in queue order per category
#[derive(Debug, Default)]
pub(crate) struct Outcomes {
    pub rates: Vec<RateResult>,
    pub takes: Vec<ConcurrencyResult>,
}

/// Batch of operations bound to a [`Limiter`]
#[derive(Debug)]
pub struct Pipeline {
    limiter: Limiter,
    rates: Vec<QueuedRate>,
    takes: Vec<QueuedTake>,
    releases: Vec<QueuedRelease>,
}

impl Pipeline {
    pub(crate) fn new(limiter: Limiter) -> Self {
        Self {
            limiter,
            rates: Vec::new(),
            takes: Vec::new(),
            releases: Vec::new(),
        }
    }

    /// Queue a check for one event
    pub fn allow(&mut self, key: &str, limit: Limit) -> RateHandle {
        self.allow_n(key, limit, 1)
    }

    /// Queue a check admitting exactly `n` events or none
    pub fn allow_n(&mut self, key: &str, limit: Limit, n: i64) -> RateHandle {
        self.queue_rate(ScriptKind::AllowN, key, limit, n)
    }

    /// Queue a check admitting up to `n` events
    pub fn allow_at_most(&mut self, key: &str, limit: Limit, n: i64) -> RateHandle {
        self.queue_rate(ScriptKind::AllowAtMost, key, limit, n)
    }

    /// Queue a lease acquire or refresh for `request_id`
    pub fn take(
        &mut self,
        key: &str,
        request_id: &str,
        limit: ConcurrencyLimit,
    ) -> ConcurrencyHandle {
        let handle = ConcurrencyHandle::default();
        self.takes.push(QueuedTake {
            key: key.to_string(),
            request_id: request_id.to_string(),
            limit,
            handle: handle.clone(),
        });
        handle
    }

    /// Queue a lease release; releasing an unknown lease is a no-op
    pub fn release(&mut self, key: &str, request_id: &str) {
        self.releases.push(QueuedRelease {
            key: key.to_string(),
            request_id: request_id.to_string(),
        });
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.rates.len() + self.takes.len() + self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute every queued operation and publish the handles
    ///
    /// On any error no handle is populated.
    pub async fn exec(self) -> Result<()> {
        let outcomes = self.run().await?;

        for (op, result) in self.rates.iter().zip(outcomes.rates) {
            op.handle.publish(result);
        }
        for (op, result) in self.takes.iter().zip(outcomes.takes) {
            op.handle.publish(result);
        }
        Ok(())
    }

    /// [`exec`](Self::exec) bounded by `deadline`, reloads included
    pub async fn exec_before(self, deadline: Instant) -> Result<()> {
        with_deadline(deadline, self.exec()).await
    }

    fn queue_rate(&mut self, kind: ScriptKind, key: &str, limit: Limit, n: i64) -> RateHandle {
        let handle = RateHandle::default();
        self.rates.push(QueuedRate {
            kind,
            key: key.to_string(),
            limit,
            n,
            handle: handle.clone(),
        });
        handle
    }

    fn validate(&self) -> Result<()> {
        for op in &self.rates {
            op.limit.validate()?;
            if op.n < 0 {
                return Err(Error::InvalidRequest(format!(
                    "{}: count must not be negative, got {}",
                    op.kind, op.n
                )));
            }
        }
        for op in &self.takes {
            op.limit.validate()?;
            if op.request_id.is_empty() {
                return Err(Error::InvalidRequest(
                    "request id must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn build_batch(&self) -> Batch {
        let scripts = self.limiter.scripts();
        let config = self.limiter.config();
        let mut batch = Batch::new();

        for op in &self.rates {
            let key = format!("{}{}", config.rate_prefix, op.key);
            let args = [
                op.limit.burst.to_string(),
                op.limit.rate.to_string(),
                op.limit.period.as_secs_f64().to_string(),
                op.n.to_string(),
            ];
            batch.push(Some(op.kind), scripts.invoke_cmd(op.kind, &key, &args));
        }

        for op in &self.takes {
            let key = format!("{}{}", config.concurrency_prefix, op.key);
            let args = [
                op.request_id.clone(),
                op.limit.max.to_string(),
                op.limit.lease_ttl_secs().to_string(),
            ];
            batch.push(
                Some(ScriptKind::ConcurrencyTake),
                scripts.invoke_cmd(ScriptKind::ConcurrencyTake, &key, &args),
            );
        }

        for op in &self.releases {
            let key = format!("{}{}", config.concurrency_prefix, op.key);
            batch.push(None, Cmd::new("HDEL").arg(key).arg(&op.request_id));
        }

        batch
    }

    /// Validate, execute and decode without touching the handles
    pub(crate) async fn run(&self) -> Result<Outcomes> {
        self.validate()?;
        if self.is_empty() {
            return Ok(Outcomes::default());
        }

        let batch = self.build_batch();
        let replies =
            executor::execute(self.limiter.connection(), self.limiter.scripts(), &batch).await?;

        let (rate_replies, rest) = replies.split_at(self.rates.len());
        let (take_replies, release_replies) = rest.split_at(self.takes.len());

        let rates = self
            .rates
            .iter()
            .zip(rate_replies)
            .map(|(op, value)| {
                let reply = RateReply::decode(value)?;
                let mut result = RateResult::new(op.key.clone(), op.limit);
                result.allowed = reply.allowed;
                result.remaining = reply.remaining;
                result.used = (op.limit.burst - reply.remaining).clamp(0, op.limit.burst);
                result.retry_after = reply.retry_after;
                result.reset_after = reply.reset_after;
                Ok(result)
            })
            .collect::<Result<Vec<_>>>()?;

        let takes = self
            .takes
            .iter()
            .zip(take_replies)
            .map(|(op, value)| {
                let reply = TakeReply::decode(value)?;
                Ok(ConcurrencyResult {
                    key: op.key.clone(),
                    request_id: op.request_id.clone(),
                    limit: op.limit,
                    allowed: reply.allowed,
                    used: reply.used,
                    remaining: (op.limit.max - reply.used).max(0),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for value in release_replies {
            check_error(value)?;
        }

        Ok(Outcomes { rates, takes })
    }
}
