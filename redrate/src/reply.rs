//! Fixed-arity decoding of procedure replies
//!
//! Procedure replies are positional arrays. Each is decoded into a small
//! struct with explicit count and type checks; any mismatch is a
//! [`Error::MalformedReply`].

use crate::error::{Error, Result};
use crate::store::Value;
use std::time::Duration;

/// Reply of `allow_n` / `allow_at_most`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RateReply {
    pub allowed: i64,
    pub remaining: i64,
    pub retry_after: Option<Duration>,
    pub reset_after: Duration,
}

impl RateReply {
    pub fn decode(value: &Value) -> Result<Self> {
        let items = array_of(value, 4, "rate")?;
        let allowed = int_at(items, 0, "rate")?;
        let remaining = int_at(items, 1, "rate")?;
        let retry_after = seconds_at(items, 2, "rate")?;
        let reset_after = seconds_at(items, 3, "rate")?;

        if retry_after < 0.0 && retry_after != -1.0 {
            return Err(Error::MalformedReply(format!(
                "rate: negative retry_after {retry_after}"
            )));
        }

        Ok(Self {
            allowed,
            remaining: remaining.max(0),
            retry_after: if retry_after == -1.0 {
                None
            } else {
                Some(duration_from_secs(retry_after))
            },
            reset_after: duration_from_secs(reset_after),
        })
    }
}

/// Reply of `concurrency_take`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TakeReply {
    pub allowed: bool,
    pub used: i64,
}

impl TakeReply {
    pub fn decode(value: &Value) -> Result<Self> {
        let items = array_of(value, 2, "concurrency")?;
        let allowed = match int_at(items, 0, "concurrency")? {
            0 => false,
            1 => true,
            n => {
                return Err(Error::MalformedReply(format!(
                    "concurrency: allowed flag must be 0 or 1, got {n}"
                )));
            }
        };
        let used = int_at(items, 1, "concurrency")?;
        if used < 0 {
            return Err(Error::MalformedReply(format!(
                "concurrency: negative lease count {used}"
            )));
        }
        Ok(Self { allowed, used })
    }
}

/// Decode a single-identity `SCRIPT EXISTS` reply
pub(crate) fn decode_exists(value: &Value) -> Result<bool> {
    if let Value::Error(msg) = value {
        return Err(Error::Command(format!("SCRIPT EXISTS: {msg}")));
    }
    let items = array_of(value, 1, "SCRIPT EXISTS")?;
    match int_at(items, 0, "SCRIPT EXISTS")? {
        0 => Ok(false),
        1 => Ok(true),
        n => Err(Error::MalformedReply(format!(
            "SCRIPT EXISTS: expected 0 or 1, got {n}"
        ))),
    }
}

/// Error replies become [`Error::Command`]; anything else passes through
pub(crate) fn check_error(value: &Value) -> Result<&Value> {
    match value {
        Value::Error(msg) => Err(Error::Command(msg.clone())),
        other => Ok(other),
    }
}

fn array_of<'a>(value: &'a Value, len: usize, what: &str) -> Result<&'a [Value]> {
    match check_error(value)? {
        Value::Array(items) if items.len() == len => Ok(items),
        Value::Array(items) => Err(Error::MalformedReply(format!(
            "{what}: expected {len} elements, got {}",
            items.len()
        ))),
        other => Err(Error::MalformedReply(format!(
            "{what}: expected array, got {other:?}"
        ))),
    }
}

fn int_at(items: &[Value], idx: usize, what: &str) -> Result<i64> {
    items[idx].as_int().ok_or_else(|| {
        Error::MalformedReply(format!(
            "{what}: element {idx} should be an integer, got {:?}",
            items[idx]
        ))
    })
}

fn seconds_at(items: &[Value], idx: usize, what: &str) -> Result<f64> {
    let parsed = match &items[idx] {
        Value::Data(s) | Value::Status(s) => s.trim().parse::<f64>().ok(),
        Value::Int(n) => Some(*n as f64),
        _ => None,
    };
    match parsed {
        Some(secs) if secs.is_finite() => Ok(secs),
        _ => Err(Error::MalformedReply(format!(
            "{what}: element {idx} should be a number of seconds, got {:?}",
            items[idx]
        ))),
    }
}

fn duration_from_secs(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}
