//! The store client against the in-process server

use redrate::memory::MemoryStore;
use redrate::{Cmd, ConcurrencyLimit, Error, Limit, Limiter, LimiterConfig, TransportError, Value};
use redrate_client::{ClientBuilder, RedisClient};
use redrate_integration_tests::TestServer;
use std::time::Duration;
use tokio::net::TcpListener;

async fn setup() -> (TestServer, Limiter) {
    let server = TestServer::start(MemoryStore::new()).await.unwrap();
    let client = RedisClient::connect(server.addr()).await.unwrap();
    (server, Limiter::with_defaults(client))
}

#[tokio::test]
async fn test_basic_rate_limiting() {
    let (_server, limiter) = setup().await;

    let res = limiter.allow("test_key", Limit::per_minute(10)).await.unwrap();
    assert_eq!(res.allowed, 1);
    assert_eq!(res.remaining, 9);
    assert_eq!(res.retry_after, None);

    let res = limiter.allow_n("test_key", Limit::per_minute(10), 20).await.unwrap();
    assert_eq!(res.allowed, 0);
    assert_eq!(res.remaining, 9);
    assert!(res.retry_after.is_some());
}

#[tokio::test]
async fn test_noscript_survives_the_client() {
    let (server, limiter) = setup().await;

    limiter.allow("k", Limit::per_second(5)).await.unwrap();
    assert_eq!(server.store().script_loads(), 3);

    server.store().flush_scripts();
    let res = limiter.allow("k", Limit::per_second(5)).await.unwrap();
    assert_eq!(res.allowed, 1);
    assert_eq!(res.remaining, 3);
    assert_eq!(server.store().script_loads(), 6);
}

#[tokio::test]
async fn test_concurrency_over_the_wire() {
    let (_server, limiter) = setup().await;
    let limit = ConcurrencyLimit::new(1, Duration::from_secs(30));

    assert!(limiter.take("jobs", "a", limit).await.unwrap().allowed);
    assert!(!limiter.take("jobs", "b", limit).await.unwrap().allowed);
    limiter.release("jobs", "a").await.unwrap();
    assert!(limiter.take("jobs", "b", limit).await.unwrap().allowed);
}

#[tokio::test]
async fn test_clones_share_one_connection() {
    let (_server, limiter) = setup().await;

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .allow(&format!("key_{i}"), Limit::per_second(10))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap().allowed, 1);
    }
}

#[tokio::test]
async fn test_handshake_and_prefixes() {
    let server = TestServer::start(MemoryStore::new()).await.unwrap();

    let client = ClientBuilder::new()
        .username("svc")
        .password("secret")
        .database(3)
        .build(server.addr())
        .await
        .unwrap();

    let limiter = Limiter::new(
        client,
        LimiterConfig {
            rate_prefix: "app:rate:".to_string(),
            concurrency_prefix: "app:conc:".to_string(),
        },
    );
    limiter.allow("k", Limit::per_second(1)).await.unwrap();
    assert!(server.store().contains_key("app:rate:k"));
}

#[tokio::test]
async fn test_reconnects_after_the_store_hangs_up() {
    let (server, limiter) = setup().await;
    limiter.load_scripts().await.unwrap();

    server.store().fail_next_round_trips(1);
    let err = limiter.allow("k", Limit::per_second(1)).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    // the client replaces the dropped connection on its own
    let res = limiter.allow("k", Limit::per_second(1)).await.unwrap();
    assert_eq!(res.allowed, 1);
}

#[tokio::test]
async fn test_raw_query() {
    let server = TestServer::start(MemoryStore::new()).await.unwrap();
    let client = RedisClient::connect(server.addr()).await.unwrap();

    let replies = client
        .query(&[
            Cmd::new("SET").arg("plain").arg("v"),
            Cmd::new("GET").arg("plain"),
            Cmd::new("GET").arg("missing"),
            Cmd::new("HLEN").arg("plain"),
            Cmd::new("PING"),
        ])
        .await
        .unwrap();

    assert_eq!(replies[0], Value::Status("OK".to_string()));
    assert_eq!(replies[1], Value::Data("v".to_string()));
    assert_eq!(replies[2], Value::Nil);
    assert!(replies[3].is_error());
    assert_eq!(replies[4], Value::Status("PONG".to_string()));

    assert!(client.query(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_store() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = ClientBuilder::new()
        .reconnect_retries(0)
        .connect_timeout(Duration::from_secs(1))
        .build(addr)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TransportError::Connect(_) | TransportError::Timeout));
}
