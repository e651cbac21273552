//! Basic example of using redrate against a local Redis

use redrate::{ConcurrencyLimit, Limit, Limiter};
use redrate_client::{ClientBuilder, RedisClient};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("redrate=debug,redrate_client=debug")
        .init();

    // Connect to Redis with default configuration
    println!("Connecting to Redis...");
    let client = RedisClient::connect("127.0.0.1:6379").await?;
    println!("Connected!");

    let limiter = Limiter::with_defaults(client);
    limiter.load_scripts().await?;

    // Example 1: Basic rate limit check
    println!("\n=== Basic Rate Limit Check ===");
    let res = limiter
        .allow("user:123", Limit::new(100, 10, Duration::from_secs(60)))
        .await?;

    println!("Allowed: {}", res.allowed);
    println!("Limit: {}", res.limit);
    println!("Remaining: {}", res.remaining);
    println!("Retry after: {:?}", res.retry_after);
    println!("Reset after: {:?}", res.reset_after);

    // Example 2: Partial admission
    println!("\n=== Partial Admission ===");
    let res = limiter
        .allow_at_most("api:bulk_operation", Limit::per_hour(50), 80)
        .await?;
    println!("Asked for 80, got {}", res.allowed);

    // Example 3: Concurrency lease
    println!("\n=== Concurrency Lease ===");
    let limit = ConcurrencyLimit::new(2, Duration::from_secs(30));
    let lease = limiter.take("reports", "job-42", limit).await?;
    println!("Lease granted: {} ({} in use)", lease.allowed, lease.used);
    limiter.release("reports", "job-42").await?;

    // Example 4: Batch everything in one round trip
    println!("\n=== Pipeline ===");
    let mut pipe = limiter.pipeline();
    let a = pipe.allow("user:1", Limit::per_second(5));
    let b = pipe.allow("user:2", Limit::per_second(5));
    pipe.exec().await?;
    println!("user:1 allowed {}, user:2 allowed {}", a.result()?.allowed, b.result()?.allowed);

    // Example 5: Using the builder for advanced configuration
    println!("\n=== Custom Client Configuration ===");
    let custom_client = ClientBuilder::new()
        .connect_timeout(Duration::from_secs(10))
        .request_timeout(Duration::from_secs(2))
        .reconnect_retries(5)
        .database(1)
        .build("127.0.0.1:6379")
        .await?;

    let custom = Limiter::with_defaults(custom_client);
    let res = custom.allow("custom:1", Limit::per_minute(30)).await?;
    println!("Custom client allowed: {}", res.allowed);

    Ok(())
}
