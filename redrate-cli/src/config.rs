//! CLI configuration and argument parsing
//!
//! Every global option can also be set through an environment variable with
//! the `REDRATE_` prefix.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! # Example Usage
//!
//! ```bash
//! # Check one event against 10 req/s
//! redrate allow user:123 --rate 10
//!
//! # Using environment variables
//! export REDRATE_HOST=redis.internal
//! export REDRATE_PASSWORD=secret
//! redrate take reports --max 2 --request-max-duration 30s
//!
//! # Mixed (CLI overrides env)
//! export REDRATE_PORT=6380
//! redrate --port 6379 ping  # Uses port 6379
//! ```

use anyhow::{Context, Result, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use redrate::{Limit, LimiterConfig};
use redrate_client::ClientConfig;
use std::time::Duration;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Fully resolved configuration for one CLI invocation
#[derive(Debug, Clone)]
pub struct Config {
    /// Store connection settings
    pub store: StoreConfig,
    /// Key namespaces
    pub limiter: LimiterSettings,
    /// Deadline for the whole operation, reloads included
    pub timeout: Option<Duration>,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Print results as JSON
    pub json: bool,
    /// The operation to run
    pub operation: Operation,
}

/// Store connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl StoreConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            username: self.username.clone(),
            password: self.password.clone(),
            database: i64::from(self.database),
            ..ClientConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub rate_prefix: String,
    pub concurrency_prefix: String,
}

impl From<LimiterSettings> for LimiterConfig {
    fn from(settings: LimiterSettings) -> Self {
        LimiterConfig {
            rate_prefix: settings.rate_prefix,
            concurrency_prefix: settings.concurrency_prefix,
        }
    }
}

/// Token bucket parameters as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSpec {
    pub rate: i64,
    pub burst: i64,
    pub period: Duration,
}

impl From<LimitSpec> for Limit {
    fn from(spec: LimitSpec) -> Self {
        Limit::new(spec.rate, spec.burst, spec.period)
    }
}

/// One limiter operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Allow {
        key: String,
        limit: LimitSpec,
        count: i64,
    },
    AllowAtMost {
        key: String,
        limit: LimitSpec,
        count: i64,
    },
    Take {
        key: String,
        request_id: String,
        max: i64,
        request_max_duration: Duration,
    },
    Release {
        key: String,
        request_id: String,
    },
    Reset {
        key: String,
    },
    LoadScripts,
    Ping,
}

/// Command-line arguments
///
/// All global options can also be set via environment variables with the
/// REDRATE_ prefix. CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(
    name = "redrate",
    about = "Distributed rate and concurrency limiting from the command line",
    long_about = "Run redrate limiter operations against a Redis-compatible store.\n\nEnvironment variables with REDRATE_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // Store connection
    #[arg(
        long,
        value_name = "HOST",
        help = "Store host",
        default_value = "127.0.0.1",
        env = "REDRATE_HOST"
    )]
    pub host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "Store port",
        default_value_t = 6379,
        env = "REDRATE_PORT"
    )]
    pub port: u16,
    #[arg(long, value_name = "USER", help = "ACL username", env = "REDRATE_USERNAME")]
    pub username: Option<String>,
    #[arg(
        long,
        value_name = "PASSWORD",
        help = "Password sent with AUTH",
        env = "REDRATE_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,
    #[arg(
        long,
        value_name = "DB",
        help = "Database to SELECT",
        default_value_t = 0,
        env = "REDRATE_DATABASE"
    )]
    pub database: u32,
    #[arg(
        long,
        value_name = "MS",
        help = "Connect timeout in milliseconds",
        default_value_t = 5_000,
        env = "REDRATE_CONNECT_TIMEOUT_MS"
    )]
    pub connect_timeout_ms: u64,
    #[arg(
        long,
        value_name = "MS",
        help = "Timeout of a single round trip in milliseconds",
        default_value_t = 30_000,
        env = "REDRATE_REQUEST_TIMEOUT_MS"
    )]
    pub request_timeout_ms: u64,
    #[arg(
        long,
        value_name = "MS",
        help = "Deadline for the whole operation in milliseconds",
        env = "REDRATE_TIMEOUT_MS"
    )]
    pub timeout_ms: Option<u64>,

    // Key namespaces
    #[arg(
        long,
        value_name = "PREFIX",
        help = "Prefix of rate state keys",
        default_value = "rate:",
        env = "REDRATE_RATE_PREFIX"
    )]
    pub rate_prefix: String,
    #[arg(
        long,
        value_name = "PREFIX",
        help = "Prefix of lease hash keys",
        default_value = "concurrency:",
        env = "REDRATE_CONCURRENCY_PREFIX"
    )]
    pub concurrency_prefix: String,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "warn",
        env = "REDRATE_LOG_LEVEL"
    )]
    pub log_level: String,
    #[arg(long, help = "Print results as JSON", env = "REDRATE_JSON")]
    pub json: bool,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct LimitArgs {
    /// Logical key, without prefix
    pub key: String,
    #[arg(long, help = "Tokens added per period")]
    pub rate: i64,
    #[arg(long, help = "Bucket capacity [default: rate]")]
    pub burst: Option<i64>,
    #[arg(
        long,
        value_name = "DURATION",
        help = "Refill period, e.g. 1s, 500ms, 1m",
        default_value = "1s"
    )]
    pub period: humantime::Duration,
}

impl LimitArgs {
    fn spec(&self) -> LimitSpec {
        LimitSpec {
            rate: self.rate,
            burst: self.burst.unwrap_or(self.rate),
            period: self.period.into(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Admit exactly COUNT events or none
    Allow {
        #[command(flatten)]
        limit: LimitArgs,
        #[arg(long, short = 'n', default_value_t = 1)]
        count: i64,
    },
    /// Admit as many of COUNT events as currently possible
    AllowAtMost {
        #[command(flatten)]
        limit: LimitArgs,
        #[arg(long, short = 'n')]
        count: i64,
    },
    /// Acquire or refresh a concurrency lease
    Take {
        /// Logical key, without prefix
        key: String,
        #[arg(long, help = "Lease holder id [default: random]")]
        request_id: Option<String>,
        #[arg(long, help = "Maximum simultaneous leases")]
        max: i64,
        #[arg(
            long,
            value_name = "DURATION",
            help = "Lease lifetime, rounded to whole seconds",
            default_value = "60s"
        )]
        request_max_duration: humantime::Duration,
    },
    /// Release a concurrency lease
    Release {
        /// Logical key, without prefix
        key: String,
        /// Lease holder id
        request_id: String,
    },
    /// Forget the rate state of a key
    Reset {
        /// Logical key, without prefix
        key: String,
    },
    /// Register the limiter procedures with the store
    LoadScripts,
    /// Check that the store answers
    Ping,
}

fn random_request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    /// Build and validate configuration from parsed arguments
    pub fn from_args(args: Args) -> Result<Self> {
        let command = args
            .command
            .ok_or_else(|| anyhow!("No operation given.\n\nFor more information, try '--help'"))?;

        let operation = match command {
            Command::Allow { limit, count } => Operation::Allow {
                key: limit.key.clone(),
                limit: limit.spec(),
                count,
            },
            Command::AllowAtMost { limit, count } => Operation::AllowAtMost {
                key: limit.key.clone(),
                limit: limit.spec(),
                count,
            },
            Command::Take {
                key,
                request_id,
                max,
                request_max_duration,
            } => Operation::Take {
                key,
                request_id: request_id.unwrap_or_else(random_request_id),
                max,
                request_max_duration: request_max_duration.into(),
            },
            Command::Release { key, request_id } => Operation::Release { key, request_id },
            Command::Reset { key } => Operation::Reset { key },
            Command::LoadScripts => Operation::LoadScripts,
            Command::Ping => Operation::Ping,
        };

        let config = Config {
            store: StoreConfig {
                host: args.host,
                port: args.port,
                username: args.username,
                password: args.password,
                database: args.database,
                connect_timeout: Duration::from_millis(args.connect_timeout_ms),
                request_timeout: Duration::from_millis(args.request_timeout_ms),
            },
            limiter: LimiterSettings {
                rate_prefix: args.rate_prefix,
                concurrency_prefix: args.concurrency_prefix,
            },
            timeout: args.timeout_ms.map(Duration::from_millis),
            log_level: args.log_level.to_lowercase(),
            json: args.json,
            operation,
        };

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level: {}. Valid options are: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            ));
        }
        if self.store.port == 0 {
            return Err(anyhow!("Port must not be 0"));
        }
        if self.store.username.is_some() && self.store.password.is_none() {
            return Err(anyhow!("--username requires --password"));
        }
        if self.store.connect_timeout.is_zero() || self.store.request_timeout.is_zero() {
            return Err(anyhow!("Connect and request timeouts must be positive"));
        }

        match &self.operation {
            Operation::Allow { key, limit, count } | Operation::AllowAtMost { key, limit, count } => {
                validate_key(key)?;
                if limit.rate <= 0 || limit.burst <= 0 || limit.period.is_zero() {
                    return Err(anyhow!(
                        "Rate, burst and period must be positive, got {}",
                        Limit::from(*limit)
                    ));
                }
                if *count < 0 {
                    return Err(anyhow!("Count must not be negative, got {count}"));
                }
            }
            Operation::Take {
                key,
                request_id,
                max,
                ..
            } => {
                validate_key(key)?;
                if request_id.is_empty() {
                    return Err(anyhow!("Request id must not be empty"));
                }
                if *max < 0 {
                    return Err(anyhow!("Max must not be negative, got {max}"));
                }
            }
            Operation::Release { key, request_id } => {
                validate_key(key)?;
                if request_id.is_empty() {
                    return Err(anyhow!("Request id must not be empty"));
                }
            }
            Operation::Reset { key } => validate_key(key)?,
            Operation::LoadScripts | Operation::Ping => {}
        }

        Ok(())
    }

    /// Print all available environment variables and their descriptions
    fn print_env_vars() {
        println!("redrate Environment Variables");
        println!("=============================");
        println!();
        println!("All environment variables use the REDRATE_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("Store Connection:");
        println!("  REDRATE_HOST=<host>                   Store host [default: 127.0.0.1]");
        println!("  REDRATE_PORT=<port>                   Store port [default: 6379]");
        println!("  REDRATE_USERNAME=<user>               ACL username (requires password)");
        println!("  REDRATE_PASSWORD=<password>           Password sent with AUTH");
        println!("  REDRATE_DATABASE=<db>                 Database to SELECT [default: 0]");
        println!(
            "  REDRATE_CONNECT_TIMEOUT_MS=<ms>       Connect timeout [default: 5000]"
        );
        println!(
            "  REDRATE_REQUEST_TIMEOUT_MS=<ms>       Single round trip timeout [default: 30000]"
        );
        println!("  REDRATE_TIMEOUT_MS=<ms>               Whole operation deadline [default: none]");
        println!();

        println!("Key Namespaces:");
        println!("  REDRATE_RATE_PREFIX=<prefix>          Rate key prefix [default: rate:]");
        println!(
            "  REDRATE_CONCURRENCY_PREFIX=<prefix>   Lease key prefix [default: concurrency:]"
        );
        println!();

        println!("General Configuration:");
        println!(
            "  REDRATE_LOG_LEVEL=<level>             Log level: error, warn, info, debug, trace [default: warn]"
        );
        println!("  REDRATE_JSON=true|false               Print results as JSON");
        println!();

        println!("Examples:");
        println!("  # Point at a remote store");
        println!("  export REDRATE_HOST=redis.internal");
        println!("  export REDRATE_DATABASE=2");
        println!();
        println!("  # Run an operation (CLI args override env vars)");
        println!("  redrate --database 0 allow user:1 --rate 10  # Will use database 0, not 2");
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(anyhow!("Key must not be empty"));
    }
    Ok(())
}
