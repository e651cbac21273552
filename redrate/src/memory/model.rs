//! Native models of the Lua procedures
//!
//! Each function mirrors its script line for line in terms of arithmetic, so
//! results from [`MemoryStore`](super::MemoryStore) match a real store with a
//! frozen clock.

use crate::store::Value;
use std::collections::HashMap;

/// Tolerance for float noise when comparing and flooring token counts
const EPSILON: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RateArgs {
    pub burst: f64,
    pub rate: f64,
    pub period: f64,
    pub cost: i64,
}

impl RateArgs {
    pub fn parse(argv: &[String]) -> Result<Self, String> {
        if argv.len() != 4 {
            return Err(format!("expected 4 arguments, got {}", argv.len()));
        }
        let num = |idx: usize| {
            argv[idx]
                .parse::<f64>()
                .map_err(|_| format!("argument {} is not a number: {}", idx + 1, argv[idx]))
        };
        Ok(Self {
            burst: num(0)?,
            rate: num(1)?,
            period: num(2)?,
            cost: num(3)? as i64,
        })
    }

    fn emission_interval(&self) -> f64 {
        self.period / self.rate
    }
}

/// What a rate procedure replied and, if it wrote, the new state
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RateOutcome {
    pub reply: Value,
    /// New TAT and its expiry in whole seconds
    pub write: Option<(f64, u64)>,
}

fn rate_reply(allowed: i64, remaining: f64, retry_after: f64, reset_after: f64) -> Value {
    Value::Array(vec![
        Value::Int(allowed),
        Value::Int(remaining as i64),
        Value::Data(retry_after.to_string()),
        Value::Data(reset_after.to_string()),
    ])
}

fn write_if_pending(new_tat: f64, reset_after: f64) -> Option<(f64, u64)> {
    (reset_after > 0.0).then(|| (new_tat, reset_after.ceil() as u64))
}

/// Model of `allow_n.lua`; `now` is seconds since 2017-01-01
pub(crate) fn allow_n(stored_tat: Option<f64>, now: f64, args: RateArgs) -> RateOutcome {
    let emission_interval = args.emission_interval();
    let increment = emission_interval * args.cost as f64;
    let burst_offset = emission_interval * args.burst;

    let tat = stored_tat.unwrap_or(now).max(now);
    let new_tat = tat + increment;
    let allow_at = new_tat - burst_offset;
    let diff = now - allow_at;

    if diff < -EPSILON * emission_interval {
        let available = ((now - (tat - burst_offset)) / emission_interval + EPSILON)
            .floor()
            .max(0.0);
        return RateOutcome {
            reply: rate_reply(0, available, -diff, tat - now),
            write: None,
        };
    }

    let reset_after = new_tat - now;
    let remaining = (diff / emission_interval + EPSILON).floor().max(0.0);
    RateOutcome {
        reply: rate_reply(args.cost, remaining, -1.0, reset_after),
        write: write_if_pending(new_tat, reset_after),
    }
}

/// Model of `allow_at_most.lua`
pub(crate) fn allow_at_most(stored_tat: Option<f64>, now: f64, args: RateArgs) -> RateOutcome {
    let emission_interval = args.emission_interval();
    let burst_offset = emission_interval * args.burst;

    let tat = stored_tat.unwrap_or(now).max(now);
    let diff = now - (tat - burst_offset);
    let available = diff / emission_interval;

    if available < 1.0 - EPSILON {
        return RateOutcome {
            reply: rate_reply(0, 0.0, emission_interval - diff, tat - now),
            write: None,
        };
    }

    let allowed = args.cost.min((available + EPSILON).floor() as i64);
    let new_tat = tat + emission_interval * allowed as f64;
    let remaining = (available - allowed as f64 + EPSILON).floor().max(0.0);

    let retry_after = if allowed < args.cost {
        (emission_interval - (now - (new_tat - burst_offset))).max(0.0)
    } else {
        -1.0
    };

    let reset_after = new_tat - now;
    RateOutcome {
        reply: rate_reply(allowed, remaining, retry_after, reset_after),
        write: write_if_pending(new_tat, reset_after),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeaseArgs {
    pub request_id: String,
    pub max: i64,
    pub ttl: i64,
}

impl LeaseArgs {
    pub fn parse(argv: &[String]) -> Result<Self, String> {
        if argv.len() != 3 {
            return Err(format!("expected 3 arguments, got {}", argv.len()));
        }
        let int = |idx: usize| {
            argv[idx]
                .parse::<i64>()
                .map_err(|_| format!("argument {} is not an integer: {}", idx + 1, argv[idx]))
        };
        Ok(Self {
            request_id: argv[0].clone(),
            max: int(1)?,
            ttl: int(2)?,
        })
    }
}

/// Model of `concurrency_take.lua` over the lease hash
///
/// `now` is whole unix seconds. Returns the reply and whether the caller should
/// extend the hash key's expiry to at least `ttl`.
pub(crate) fn concurrency_take(
    leases: &mut HashMap<String, String>,
    now: i64,
    args: &LeaseArgs,
) -> (Value, bool) {
    leases.retain(|_, expires_at| expires_at.parse::<i64>().is_ok_and(|at| at > now));

    let count = leases.len() as i64;
    let held = leases.contains_key(&args.request_id);

    if !held && count >= args.max {
        return (Value::Array(vec![Value::Int(0), Value::Int(count)]), false);
    }

    leases.insert(args.request_id.clone(), (now + args.ttl).to_string());
    let count = if held { count } else { count + 1 };
    (Value::Array(vec![Value::Int(1), Value::Int(count)]), true)
}
