//! Rendering of operation results

use redrate::{ConcurrencyResult, RateResult};
use serde::Serialize;
use std::time::Duration;

/// Result of one CLI operation, ready to print
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    Rate(RateOutput),
    Lease(LeaseOutput),
    Done { op: &'static str, key: Option<String> },
}

#[derive(Debug, Serialize)]
pub struct RateOutput {
    pub key: String,
    pub limit: String,
    pub requested: i64,
    pub allowed: i64,
    pub used: i64,
    pub remaining: i64,
    pub retry_after_ms: Option<u64>,
    pub reset_after_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct LeaseOutput {
    pub key: String,
    pub request_id: String,
    pub max: i64,
    pub allowed: bool,
    pub used: i64,
    pub remaining: i64,
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

impl Output {
    pub fn rate(res: RateResult, requested: i64) -> Self {
        Output::Rate(RateOutput {
            limit: res.limit.to_string(),
            key: res.key,
            requested,
            allowed: res.allowed,
            used: res.used,
            remaining: res.remaining,
            retry_after_ms: res.retry_after.map(millis),
            reset_after_ms: millis(res.reset_after),
        })
    }

    pub fn lease(res: ConcurrencyResult) -> Self {
        Output::Lease(LeaseOutput {
            key: res.key,
            request_id: res.request_id,
            max: res.limit.max,
            allowed: res.allowed,
            used: res.used,
            remaining: res.remaining,
        })
    }

    pub fn done(op: &'static str, key: Option<&str>) -> Self {
        Output::Done {
            op,
            key: key.map(str::to_string),
        }
    }

    /// Whether the operation was admitted in full
    pub fn admitted(&self) -> bool {
        match self {
            Output::Rate(r) => r.allowed == r.requested,
            Output::Lease(l) => l.allowed,
            Output::Done { .. } => true,
        }
    }

    pub fn render(&self, json: bool) -> String {
        if json {
            // Serializing these plain structs cannot fail
            return serde_json::to_string(self).unwrap_or_default();
        }

        match self {
            Output::Rate(r) => {
                let mut line = format!(
                    "{} {}: allowed {}/{}, remaining {}, reset in {}ms",
                    if r.allowed == r.requested { "ALLOW" } else { "DENY" },
                    r.key,
                    r.allowed,
                    r.requested,
                    r.remaining,
                    r.reset_after_ms
                );
                if let Some(retry) = r.retry_after_ms {
                    line.push_str(&format!(", retry in {retry}ms"));
                }
                line
            }
            Output::Lease(l) => format!(
                "{} {} for {}: {} of {} in use",
                if l.allowed { "GRANTED" } else { "REFUSED" },
                l.key,
                l.request_id,
                l.used,
                l.max
            ),
            Output::Done { op, key: Some(key) } => format!("OK {op} {key}"),
            Output::Done { op, key: None } => format!("OK {op}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_output(allowed: i64, retry: Option<u64>) -> Output {
        Output::Rate(RateOutput {
            key: "user:1".to_string(),
            limit: "10 req/s (burst 10)".to_string(),
            requested: 2,
            allowed,
            used: 8,
            remaining: 2,
            retry_after_ms: retry,
            reset_after_ms: 800,
        })
    }

    #[test]
    fn test_render_rate_text() {
        assert_eq!(
            rate_output(2, None).render(false),
            "ALLOW user:1: allowed 2/2, remaining 2, reset in 800ms"
        );
        assert_eq!(
            rate_output(1, Some(100)).render(false),
            "DENY user:1: allowed 1/2, remaining 2, reset in 800ms, retry in 100ms"
        );
        assert!(!rate_output(1, Some(100)).admitted());
    }

    #[test]
    fn test_render_rate_json() {
        let json: serde_json::Value =
            serde_json::from_str(&rate_output(0, Some(250)).render(true)).unwrap();
        assert_eq!(json["kind"], "rate");
        assert_eq!(json["key"], "user:1");
        assert_eq!(json["allowed"], 0);
        assert_eq!(json["retry_after_ms"], 250);
    }

    #[test]
    fn test_render_lease_and_done() {
        let lease = Output::Lease(LeaseOutput {
            key: "jobs".to_string(),
            request_id: "abc".to_string(),
            max: 2,
            allowed: false,
            used: 2,
            remaining: 0,
        });
        assert_eq!(lease.render(false), "REFUSED jobs for abc: 2 of 2 in use");
        assert!(!lease.admitted());

        assert_eq!(Output::done("reset", Some("k")).render(false), "OK reset k");
        let json: serde_json::Value =
            serde_json::from_str(&Output::done("ping", None).render(true)).unwrap();
        assert_eq!(json["kind"], "done");
        assert_eq!(json["op"], "ping");
        assert!(json["key"].is_null());
    }
}
