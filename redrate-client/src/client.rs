use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError};
use redrate::{Cmd, Connection, TransportError, Value};
use std::net::ToSocketAddrs;
use std::time::Duration;
use tracing::{debug, info};

type Result<T> = std::result::Result<T, TransportError>;

/// Connection settings for [`RedisClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Limit on each connection attempt
    pub connect_timeout: Duration,
    /// Limit on a single round trip
    pub request_timeout: Duration,
    /// Extra connection attempts, with exponential backoff, before giving up
    pub reconnect_retries: usize,
    /// ACL user; only sent together with a password
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: i64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            reconnect_retries: 2,
            username: None,
            password: None,
            database: 0,
        }
    }
}

/// Builder for creating a RedisClient
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the timeout of a single round trip
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set how many times a failed connection attempt is retried
    pub fn reconnect_retries(mut self, retries: usize) -> Self {
        self.config.reconnect_retries = retries;
        self
    }

    /// Authenticate every new connection with `AUTH password`
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Authenticate as an ACL user; only sent together with a password
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Select a database on every new connection
    pub fn database(mut self, database: i64) -> Self {
        self.config.database = database;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect to the store at `addr`
    pub async fn build(self, addr: impl ToSocketAddrs) -> Result<RedisClient> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid address")
        })?;

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(addr.ip().to_string(), addr.port()),
            redis: RedisConnectionInfo {
                db: self.config.database,
                username: self.config.username.clone(),
                password: self.config.password.clone(),
                ..RedisConnectionInfo::default()
            },
        };
        let client = redis::Client::open(info).map_err(connect_error)?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(self.config.connect_timeout)
            .set_response_timeout(self.config.request_timeout)
            .set_number_of_retries(self.config.reconnect_retries);
        let manager = client
            .get_connection_manager_with_config(manager_config)
            .await
            .map_err(connect_error)?;
        info!("Connected to store at {}", addr);

        Ok(RedisClient { manager })
    }
}

/// Client for a Redis-compatible store
///
/// Clones share one multiplexed connection. Implements
/// [`redrate::Connection`], so it can back a [`redrate::Limiter`] directly.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    /// Create a new client with default configuration
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        ClientBuilder::new().build(addr).await
    }

    /// Create a new client builder for advanced configuration
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Submit commands in one round trip
    pub async fn query(&self, cmds: &[Cmd]) -> Result<Vec<Value>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for cmd in cmds {
            pipe.add_command(to_redis_cmd(cmd));
        }

        // Error replies stay in place; only a failed round trip is an Err
        let mut manager = self.manager.clone();
        let replies = manager
            .send_packed_commands(&pipe, 0, cmds.len())
            .await
            .map_err(transport_error)?;
        debug!("Round trip of {} commands", cmds.len());

        if replies.len() != cmds.len() {
            return Err(TransportError::Protocol(format!(
                "expected {} replies, got {}",
                cmds.len(),
                replies.len()
            )));
        }
        Ok(replies.into_iter().map(from_redis_value).collect())
    }
}

#[async_trait]
impl Connection for RedisClient {
    async fn pipeline(&self, cmds: &[Cmd]) -> Result<Vec<Value>> {
        self.query(cmds).await
    }
}

fn to_redis_cmd(cmd: &Cmd) -> redis::Cmd {
    let mut out = redis::Cmd::new();
    for arg in cmd.args() {
        out.arg(arg.as_str());
    }
    out
}

/// Flatten a reply into the RESP2 shapes the limiter understands
fn from_redis_value(value: redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Nil,
        redis::Value::Int(n) => Value::Int(n),
        redis::Value::BulkString(bytes) => Value::Data(String::from_utf8_lossy(&bytes).into_owned()),
        redis::Value::SimpleString(s) => Value::Status(s),
        redis::Value::Okay => Value::Status("OK".to_string()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(from_redis_value).collect())
        }
        redis::Value::Push { data, .. } => {
            Value::Array(data.into_iter().map(from_redis_value).collect())
        }
        redis::Value::Map(pairs) => Value::Array(
            pairs
                .into_iter()
                .flat_map(|(k, v)| [from_redis_value(k), from_redis_value(v)])
                .collect(),
        ),
        redis::Value::Attribute { data, .. } => from_redis_value(*data),
        redis::Value::Double(d) => Value::Data(d.to_string()),
        redis::Value::Boolean(b) => Value::Int(i64::from(b)),
        redis::Value::VerbatimString { text, .. } => Value::Data(text),
        redis::Value::BigNumber(n) => Value::Data(n.to_string()),
        redis::Value::ServerError(err) => Value::Error(match err.details() {
            Some(details) => format!("{} {}", err.code(), details),
            None => err.code().to_string(),
        }),
    }
}

fn transport_error(err: RedisError) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connection_dropped() {
        TransportError::ConnectionClosed
    } else if err.is_connection_refusal() {
        TransportError::Connect(err.to_string())
    } else if err.is_io_error() {
        TransportError::Io(std::io::Error::other(err))
    } else {
        TransportError::Protocol(err.to_string())
    }
}

fn connect_error(err: RedisError) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arguments_preserved() {
        let cmd = Cmd::new("EVALSHA").arg("abc").arg(1).arg("rate:k").arg(0.5);
        let packed = to_redis_cmd(&cmd).get_packed_command();
        assert_eq!(
            packed,
            b"*5\r\n$7\r\nEVALSHA\r\n$3\r\nabc\r\n$1\r\n1\r\n$6\r\nrate:k\r\n$3\r\n0.5\r\n"
        );
    }

    #[test]
    fn test_procedure_reply_conversion() {
        let reply = redis::Value::Array(vec![
            redis::Value::Int(1),
            redis::Value::Int(9),
            redis::Value::BulkString(b"-1".to_vec()),
            redis::Value::BulkString(b"0.1".to_vec()),
        ]);
        assert_eq!(
            from_redis_value(reply),
            Value::Array(vec![
                Value::Int(1),
                Value::Int(9),
                Value::Data("-1".to_string()),
                Value::Data("0.1".to_string()),
            ])
        );
    }

    #[test]
    fn test_status_and_nil_conversion() {
        assert_eq!(from_redis_value(redis::Value::Okay), Value::Status("OK".to_string()));
        assert_eq!(
            from_redis_value(redis::Value::SimpleString("PONG".to_string())),
            Value::Status("PONG".to_string())
        );
        assert_eq!(from_redis_value(redis::Value::Nil), Value::Nil);
        assert_eq!(from_redis_value(redis::Value::Boolean(true)), Value::Int(1));
    }

    #[test]
    fn test_server_errors_keep_their_code() {
        let noscript = redis::parse_redis_value(b"-NOSCRIPT No matching script.\r\n").unwrap();
        let converted = from_redis_value(noscript);
        assert!(converted.is_noscript());
        assert_eq!(
            converted,
            Value::Error("NOSCRIPT No matching script.".to_string())
        );

        let wrongtype =
            redis::parse_redis_value(b"-WRONGTYPE Operation against a key\r\n").unwrap();
        let converted = from_redis_value(wrongtype);
        assert!(converted.is_error());
        assert!(!converted.is_noscript());
    }

    #[test]
    fn test_error_mapping() {
        let dropped = RedisError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(matches!(transport_error(dropped), TransportError::ConnectionClosed));

        let timed_out = RedisError::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(matches!(transport_error(timed_out), TransportError::Timeout));

        let refused = RedisError::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert!(matches!(connect_error(refused), TransportError::Connect(_)));

        let parse = RedisError::from((redis::ErrorKind::ParseError, "bad frame"));
        assert!(matches!(transport_error(parse), TransportError::Protocol(_)));
    }

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::new()
            .password("pw")
            .database(3)
            .request_timeout(Duration::from_secs(1));
        assert_eq!(builder.config.password.as_deref(), Some("pw"));
        assert_eq!(builder.config.database, 3);
        assert_eq!(builder.config.connect_timeout, Duration::from_secs(5));
        assert_eq!(builder.config.reconnect_retries, 2);
    }
}
