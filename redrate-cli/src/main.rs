//! # redrate CLI
//!
//! Runs one limiter operation against a Redis-compatible store and prints the
//! result, either as a human-readable line or as JSON.
//!
//! ```bash
//! redrate allow user:123 --rate 10 --period 1s
//! redrate --json take reports --max 2
//! redrate release reports 3f9a1c0d2b7e4f11
//! ```
//!
//! The process exits with status 2 when an `allow`, `allow-at-most` or `take`
//! is not admitted in full, so shell scripts can branch on it.

mod config;
mod output;

use anyhow::{Context, Result};
use config::{Config, Operation};
use output::Output;
use redrate::{ConcurrencyLimit, Limit, Limiter, with_deadline};
use redrate_client::ClientBuilder;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

const EXIT_NOT_ADMITTED: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env_and_args()?;

    // Logs go to stderr so stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("redrate={}", config.log_level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Connecting to {}", config.store.addr());

    // The deadline covers connecting as well as the operation itself
    let deadline = config.timeout.map(|t| Instant::now() + t);
    let work = run(&config);
    let output = match deadline {
        Some(deadline) => with_deadline(deadline, work).await,
        None => work.await,
    }
    .with_context(|| format!("Operation against {} failed", config.store.addr()))?;

    println!("{}", output.render(config.json));
    if !output.admitted() {
        std::process::exit(EXIT_NOT_ADMITTED);
    }
    Ok(())
}

async fn run(config: &Config) -> redrate::Result<Output> {
    let client = ClientBuilder::new()
        .config(config.store.client_config())
        .build(config.store.addr())
        .await?;

    let limiter = Limiter::new(client, config.limiter.clone().into());
    execute(&limiter, &config.operation).await
}

async fn execute(limiter: &Limiter, operation: &Operation) -> redrate::Result<Output> {
    match operation {
        Operation::Allow { key, limit, count } => {
            let res = limiter.allow_n(key, Limit::from(*limit), *count).await?;
            Ok(Output::rate(res, *count))
        }
        Operation::AllowAtMost { key, limit, count } => {
            let res = limiter
                .allow_at_most(key, Limit::from(*limit), *count)
                .await?;
            Ok(Output::rate(res, *count))
        }
        Operation::Take {
            key,
            request_id,
            max,
            request_max_duration,
        } => {
            let limit = ConcurrencyLimit::new(*max, *request_max_duration);
            let res = limiter.take(key, request_id, limit).await?;
            Ok(Output::lease(res))
        }
        Operation::Release { key, request_id } => {
            limiter.release(key, request_id).await?;
            Ok(Output::done("release", Some(key)))
        }
        Operation::Reset { key } => {
            limiter.reset(key).await?;
            Ok(Output::done("reset", Some(key)))
        }
        Operation::LoadScripts => {
            limiter.load_scripts().await?;
            Ok(Output::done("load-scripts", None))
        }
        Operation::Ping => {
            limiter.ping().await?;
            Ok(Output::done("ping", None))
        }
    }
}
