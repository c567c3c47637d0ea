//! Reconnect Backoff
//!
//! Exponential backoff with a cap and symmetric jitter for stream
//! reconnection. The session owns one policy and resets it after every
//! connection that delivered at least one frame.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff settings for stream reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub base: Duration,
    /// Upper bound on any single delay, before jitter.
    pub cap: Duration,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter: f64,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(60),
            jitter: 0.1,
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectBackoff {
    /// Backoff without jitter, for deterministic schedules.
    #[must_use]
    pub const fn fixed(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            jitter: 0.0,
            multiplier: 2.0,
            max_attempts,
        }
    }

    /// Undithered delay before attempt `n` (1-based).
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Tracks attempts and produces the delay before each one.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectBackoff,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: ReconnectBackoff) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt += 1;
        Some(self.apply_jitter(self.config.nominal_delay(self.attempt)))
    }

    /// Forget previous failures after a healthy connection.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt < self.config.max_attempts
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let base = delay.as_secs_f64();
        let spread = base * jitter;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.001))
    }
}
