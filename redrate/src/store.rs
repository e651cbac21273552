//! Store protocol
//!
//! The limiter never talks to a socket itself. It hands batches of [`Cmd`]s to
//! a [`Connection`], which submits them as one pipelined round trip and returns
//! one [`Value`] per command, in order.
//!
//! Per-command failures (`NOSCRIPT`, `WRONGTYPE`, ...) come back as
//! [`Value::Error`] inside the reply vector. Only a failure of the round trip
//! as a whole is reported as a [`TransportError`].

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A reply value as returned by a Redis-compatible store
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null bulk string or null array
    Nil,
    /// Integer reply
    Int(i64),
    /// Bulk string reply
    Data(String),
    /// Simple string reply such as `OK`
    Status(String),
    /// Error reply, message without the leading `-`
    Error(String),
    /// Array reply
    Array(Vec<Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload of a bulk or simple string reply
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Data(s) | Value::Status(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Whether this is the store's "unknown procedure identity" error
    pub fn is_noscript(&self) -> bool {
        matches!(self, Value::Error(msg) if msg.starts_with("NOSCRIPT"))
    }
}

/// One store command: a name followed by string arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<String>,
}

impl Cmd {
    pub fn new(name: &str) -> Self {
        Self {
            args: vec![name.to_string()],
        }
    }

    /// Build a command from its full argument vector, name first
    pub fn from_args(args: Vec<String>) -> Self {
        Self { args }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Command name, upper-cased
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|s| s.to_uppercase())
            .unwrap_or_default()
    }

    /// All arguments including the command name
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// A pipelining connection to the store
///
/// Implementations must be safe to share between tasks; the limiter adds no
/// locking of its own.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Submit `cmds` in one round trip and return exactly one reply per command
    async fn pipeline(&self, cmds: &[Cmd]) -> Result<Vec<Value>, TransportError>;
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Arc<C> {
    async fn pipeline(&self, cmds: &[Cmd]) -> Result<Vec<Value>, TransportError> {
        (**self).pipeline(cmds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_builder() {
        let cmd = Cmd::new("evalsha").arg("abc").arg(1).arg("rate:k").arg(0.5);
        assert_eq!(cmd.name(), "EVALSHA");
        assert_eq!(cmd.args(), &["evalsha", "abc", "1", "rate:k", "0.5"]);
        assert_eq!(cmd.to_string(), "evalsha abc 1 rate:k 0.5");
    }

    #[test]
    fn test_noscript_detection() {
        let miss = Value::Error("NOSCRIPT No matching script. Please use EVAL.".to_string());
        assert!(miss.is_noscript());
        assert!(miss.is_error());
        assert!(!Value::Error("WRONGTYPE Operation".to_string()).is_noscript());
        assert!(!Value::Int(1).is_noscript());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Data("x".to_string()).as_str(), Some("x"));
        assert_eq!(Value::Status("OK".to_string()).as_str(), Some("OK"));
        assert_eq!(Value::Nil.as_str(), None);
    }
}
