//! Limits and results
//!
//! [`Limit`] and [`ConcurrencyLimit`] are plain values supplied per call. All
//! limiting state lives in the store; nothing here is persisted client side.

use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;

/// Lease TTL used when a [`ConcurrencyLimit`] does not specify one
pub const DEFAULT_LEASE_TTL_SECS: u64 = 60;

/// Token bucket limit: `rate` admissions per `period`, at most `burst` at once
///
/// # Example
///
/// ```
/// use redrate::Limit;
/// use std::time::Duration;
///
/// let limit = Limit::per_second(10);
/// assert_eq!(limit.to_string(), "10 req/s (burst 10)");
///
/// let custom = Limit::new(5, 20, Duration::from_millis(1500));
/// assert_eq!(custom.burst, 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limit {
    pub rate: i64,
    pub burst: i64,
    pub period: Duration,
}

impl Limit {
    pub fn new(rate: i64, burst: i64, period: Duration) -> Self {
        Self {
            rate,
            burst,
            period,
        }
    }

    pub fn per_second(rate: i64) -> Self {
        Self::new(rate, rate, Duration::from_secs(1))
    }

    pub fn per_minute(rate: i64) -> Self {
        Self::new(rate, rate, Duration::from_secs(60))
    }

    pub fn per_hour(rate: i64) -> Self {
        Self::new(rate, rate, Duration::from_secs(3600))
    }

    pub fn is_zero(&self) -> bool {
        *self == Limit::default()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.rate <= 0 || self.burst <= 0 || self.period.is_zero() {
            return Err(Error::InvalidRequest(format!(
                "rate, burst and period must be positive, got {self}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period.as_secs_f64() {
            p if p == 1.0 => "s".to_string(),
            p if p == 60.0 => "m".to_string(),
            p if p == 3600.0 => "h".to_string(),
            _ => format!("{:?}", self.period),
        };
        write!(f, "{} req/{} (burst {})", self.rate, unit, self.burst)
    }
}

/// Bound on simultaneous in-flight requests for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConcurrencyLimit {
    pub max: i64,
    /// How long a lease may be held before the store reclaims it
    pub request_max_duration: Duration,
}

impl ConcurrencyLimit {
    pub fn new(max: i64, request_max_duration: Duration) -> Self {
        Self {
            max,
            request_max_duration,
        }
    }

    /// Lease TTL in whole seconds, rounded to nearest; zero falls back to 60
    pub fn lease_ttl_secs(&self) -> u64 {
        let rounded = (self.request_max_duration.as_millis() + 500) / 1000;
        if rounded == 0 {
            DEFAULT_LEASE_TTL_SECS
        } else {
            rounded as u64
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max < 0 {
            return Err(Error::InvalidRequest(format!(
                "concurrency max must not be negative, got {}",
                self.max
            )));
        }
        Ok(())
    }
}

/// Outcome of a rate check
#[derive(Debug, Clone, PartialEq)]
pub struct RateResult {
    /// Logical key, without prefix
    pub key: String,
    pub limit: Limit,
    /// Number of events admitted, `0..=n`
    pub allowed: i64,
    /// Tokens in use: `burst - remaining`
    pub used: i64,
    /// Tokens left after this call
    pub remaining: i64,
    /// `None` when fully admitted, otherwise the wait before the next admission
    pub retry_after: Option<Duration>,
    /// Time until the bucket is full again
    pub reset_after: Duration,
}

impl RateResult {
    pub(crate) fn new(key: String, limit: Limit) -> Self {
        Self {
            key,
            limit,
            allowed: 0,
            used: 0,
            remaining: 0,
            retry_after: None,
            reset_after: Duration::ZERO,
        }
    }
}

/// Outcome of a lease attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyResult {
    /// Logical key, without prefix
    pub key: String,
    pub request_id: String,
    pub limit: ConcurrencyLimit,
    pub allowed: bool,
    /// Live leases after this call
    pub used: i64,
    /// `limit.max - used`, never negative
    pub remaining: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_display() {
        assert_eq!(Limit::per_second(10).to_string(), "10 req/s (burst 10)");
        assert_eq!(Limit::per_minute(100).to_string(), "100 req/m (burst 100)");
        assert_eq!(Limit::per_hour(5).to_string(), "5 req/h (burst 5)");
        assert_eq!(
            Limit::new(3, 7, Duration::from_millis(1500)).to_string(),
            "3 req/1.5s (burst 7)"
        );
    }

    #[test]
    fn test_limit_is_zero() {
        assert!(Limit::default().is_zero());
        assert!(!Limit::per_second(1).is_zero());
    }

    #[test]
    fn test_limit_validation() {
        assert!(Limit::per_second(10).validate().is_ok());
        assert!(matches!(
            Limit::new(0, 10, Duration::from_secs(1)).validate(),
            Err(Error::InvalidRequest(_))
        ));
        assert!(Limit::new(10, 0, Duration::from_secs(1)).validate().is_err());
        assert!(Limit::new(10, 10, Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_lease_ttl_rounding() {
        let limit = ConcurrencyLimit::new(1, Duration::from_secs(5));
        assert_eq!(limit.lease_ttl_secs(), 5);

        let limit = ConcurrencyLimit::new(1, Duration::from_millis(2500));
        assert_eq!(limit.lease_ttl_secs(), 3);

        let limit = ConcurrencyLimit::new(1, Duration::from_millis(1400));
        assert_eq!(limit.lease_ttl_secs(), 1);
    }

    #[test]
    fn test_lease_ttl_default() {
        assert_eq!(ConcurrencyLimit::new(1, Duration::ZERO).lease_ttl_secs(), 60);
        assert_eq!(
            ConcurrencyLimit::new(1, Duration::from_millis(400)).lease_ttl_secs(),
            60
        );
    }
}
