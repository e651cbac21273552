//! # redrate
//!
//! Distributed rate and concurrency limiting for processes sharing a
//! Redis-compatible store.
//!
//! ## Overview
//!
//! Every decision is made atomically on the store by a Lua procedure, so any
//! number of independent clients agree on the same limits:
//!
//! - **Rate limits**: a continuous-refill token bucket (GCRA) with strict
//!   ([`Limiter::allow_n`]) or partial ([`Limiter::allow_at_most`]) admission
//! - **Concurrency limits**: a bounded set of in-flight request leases that
//!   expire on their own if never released
//! - **Batching**: any mix of operations in one round trip via [`Pipeline`]
//! - **Self-healing procedure cache**: procedures are invoked by SHA-1 and
//!   transparently reloaded when the store has evicted them
//!
//! The crate does not open sockets itself. It talks to the store through the
//! [`Connection`] trait; `redrate-client` provides an implementation over
//! the `redis` crate.
//!
//! ## Quick Start
//!
//! ```
//! use redrate::memory::MemoryStore;
//! use redrate::{Limit, Limiter};
//!
//! # tokio_test::block_on(async {
//! let limiter = Limiter::with_defaults(MemoryStore::new());
//!
//! // 100 requests per minute, bursts of up to 10
//! let limit = Limit::new(100, 10, std::time::Duration::from_secs(60));
//! let res = limiter.allow("user:123", limit).await?;
//!
//! if res.allowed > 0 {
//!     println!("Request allowed! Remaining: {}", res.remaining);
//! } else if let Some(wait) = res.retry_after {
//!     println!("Rate limited! Retry after: {:?}", wait);
//! }
//! # Ok::<(), redrate::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Procedure cache
//!
//! Each round trip carries one `SCRIPT EXISTS` check per procedure family it
//! uses. A check reporting the procedure missing, or a `NOSCRIPT` reply,
//! discards the round trip, reloads every procedure and resubmits the same
//! batch, at most [`MAX_SCRIPT_RELOADS`] times. Call
//! [`Limiter::load_scripts`] at startup to avoid the first miss.
//!
//! ## Features
//!
//! - `test-util`: the in-process [`memory::MemoryStore`] double

mod deadline;
pub mod error;
mod executor;
mod limiter;
mod pipeline;
mod reply;
pub mod scripts;
pub mod store;
mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use deadline::with_deadline;
pub use error::{Error, Result, TransportError};
pub use executor::MAX_SCRIPT_RELOADS;
pub use limiter::{Limiter, LimiterConfig};
pub use pipeline::{ConcurrencyHandle, Pipeline, RateHandle};
pub use scripts::{Script, ScriptKind, Scripts};
pub use store::{Cmd, Connection, Value};
pub use types::{ConcurrencyLimit, ConcurrencyResult, DEFAULT_LEASE_TTL_SECS, Limit, RateResult};
