//! Retry policy with exponential backoff for REST calls.
//!
//! # Retryable Errors
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | HTTP 429 (Rate Limited) | HTTP 400 (Bad Request) |
//! | HTTP 408 (Request Timeout) | HTTP 401/403 (Auth Errors) |
//! | HTTP 5xx | HTTP 404 (Not Found) |
//! | Network errors and timeouts | Other 4xx |

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry configuration for REST calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3).
    pub max_attempts: u32,
    /// Delay before the second attempt (default: 100ms).
    pub initial_backoff: Duration,
    /// Largest delay between attempts (default: 10s).
    pub max_backoff: Duration,
    /// Growth factor between delays (default: 2.0).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// How a response status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx.
    Success,
    /// 401; the token must be replaced.
    Unauthorized,
    /// 429; honour `Retry-After` when present.
    RateLimited,
    /// 408 and 5xx.
    Retryable,
    /// Anything else.
    Rejected,
}

/// Categorize an HTTP status code for retry handling.
#[must_use]
pub const fn categorize_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::Unauthorized,
        429 => StatusClass::RateLimited,
        408 | 500..=599 => StatusClass::Retryable,
        _ => StatusClass::Rejected,
    }
}

/// Parse a `Retry-After` header given in seconds.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Exponential backoff calculator for one request.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Start a backoff sequence for `policy`.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts,
            current: policy.initial_backoff,
            max: policy.max_backoff,
            multiplier: policy.multiplier,
        }
    }

    /// Record a failed attempt and return the delay before the next one.
    ///
    /// Returns `None` once every attempt is used.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let delay = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.multiplier).min(self.max.as_secs_f64()),
        );
        Some(delay)
    }

    /// Failed attempts recorded so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(200, StatusClass::Success)]
    #[test_case(204, StatusClass::Success)]
    #[test_case(401, StatusClass::Unauthorized)]
    #[test_case(429, StatusClass::RateLimited)]
    #[test_case(408, StatusClass::Retryable)]
    #[test_case(500, StatusClass::Retryable)]
    #[test_case(503, StatusClass::Retryable)]
    #[test_case(400, StatusClass::Rejected)]
    #[test_case(403, StatusClass::Rejected)]
    #[test_case(404, StatusClass::Rejected)]
    fn status_categories(status: u16, expected: StatusClass) {
        assert_eq!(categorize_status(status), expected);
    }

    #[test]
    fn backoff_grows_and_stops_at_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            multiplier: 2.0,
        };
        let mut backoff = Backoff::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(250)));
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.attempts(), 4);
    }

    #[test]
    fn no_retry_policy_gives_up_immediately() {
        let mut backoff = Backoff::new(&RetryPolicy::no_retry());
        assert_eq!(backoff.next_backoff(), None);
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
