//! Store client for redrate
//!
//! [`RedisClient`] wraps a `redis` connection manager: one multiplexed
//! connection shared by every clone, re-established in the background after
//! it drops. It implements [`redrate::Connection`]:
//!
//! ```no_run
//! use redrate::{Limit, Limiter};
//! use redrate_client::RedisClient;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RedisClient::connect("127.0.0.1:6379").await?;
//! let limiter = Limiter::with_defaults(client);
//! limiter.load_scripts().await?;
//!
//! let res = limiter.allow("user:123", Limit::per_second(10)).await?;
//! println!("allowed: {}, remaining: {}", res.allowed, res.remaining);
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::{ClientBuilder, ClientConfig, RedisClient};
