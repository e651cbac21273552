use anyhow::{Context, Result};
use clap::Parser;
use redrate::memory::MemoryStore;
use redrate_integration_tests::TestServer;
use redrate_integration_tests::load_test::{self, LoadTestConfig, Mode};
use std::net::ToSocketAddrs;

#[derive(Parser)]
#[command(name = "redrate-load-test")]
#[command(about = "Load test for the redrate limiter", long_about = None)]
struct Cli {
    /// Number of concurrent workers
    #[arg(short, long, default_value = "20")]
    workers: usize,

    /// Requests per worker
    #[arg(short, long, default_value = "5000")]
    requests: usize,

    /// Operation to exercise (allow, lease, pipeline)
    #[arg(short, long, default_value = "allow")]
    mode: Mode,

    /// Distinct keys the requests are spread over
    #[arg(short, long, default_value = "1000")]
    keys: usize,

    /// Rate checks per pipeline in pipeline mode
    #[arg(short, long, default_value = "10")]
    batch: usize,

    /// Extra connection attempts before giving up
    #[arg(long, default_value = "2")]
    reconnect_retries: usize,

    /// Store address; an in-process store is used when omitted
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redrate=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Keep the in-process server alive for the whole run
    let local;
    let addr = match &cli.addr {
        Some(addr) => addr
            .to_socket_addrs()?
            .next()
            .with_context(|| format!("{addr} did not resolve"))?,
        None => {
            local = TestServer::start(MemoryStore::new()).await?;
            local.addr()
        }
    };

    println!("=== redrate Load Test ===");
    println!("Target: {addr}");
    println!("Mode: {:?}", cli.mode);
    println!("Workers: {}", cli.workers);
    println!("Requests per worker: {}", cli.requests);
    println!("Total requests: {}", cli.workers * cli.requests);

    let report = load_test::run(
        addr,
        LoadTestConfig {
            workers: cli.workers,
            requests_per_worker: cli.requests,
            mode: cli.mode,
            key_space: cli.keys,
            batch: cli.batch,
            reconnect_retries: cli.reconnect_retries,
        },
    )
    .await?;
    report.print();

    Ok(())
}
