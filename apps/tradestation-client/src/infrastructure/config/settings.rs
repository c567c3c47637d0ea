//! Client Configuration Settings
//!
//! Configuration types for the TradeStation client, loaded from environment
//! variables. Every loader takes a lookup function so tests never touch the
//! process environment.

use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{
    DEFAULT_EXPIRY_SKEW, DEFAULT_MAX_BARS_PER_CALL, DEFAULT_MAX_WORKERS, FetchConfig,
};
use crate::domain::auth::TradingEnvironment;
use crate::infrastructure::stream::{
    DEFAULT_HEARTBEAT_TIMEOUT, ReconnectBackoff, SessionConfig,
};
use crate::infrastructure::tradestation::RetryPolicy;

/// Reconnect backoff settings.
pub type BackoffSettings = ReconnectBackoff;

/// REST transport settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Trading environment. Fixed for the lifetime of a client.
    pub environment: TradingEnvironment,
    /// Concurrent chunk requests for historical fetches.
    pub max_workers: usize,
    /// Bars one REST call may return.
    pub max_bars_per_call: u32,
    /// Stream silence window.
    pub heartbeat_timeout: Duration,
    /// Stream reconnect backoff.
    pub reconnect: BackoffSettings,
    /// REST transport.
    pub http: HttpSettings,
    /// Margin kept before token expiry.
    pub token_expiry_skew: Duration,
    /// Overrides the environment's API base URL.
    pub base_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: TradingEnvironment::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            max_bars_per_call: DEFAULT_MAX_BARS_PER_CALL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reconnect: BackoffSettings::default(),
            http: HttpSettings::default(),
            token_expiry_skew: DEFAULT_EXPIRY_SKEW,
            base_url: None,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env(&lookup);

        let environment = env.parse("TS_ENVIRONMENT", defaults.environment)?;

        let reconnect = BackoffSettings {
            base: env.millis("TS_RECONNECT_BASE_MS", defaults.reconnect.base)?,
            cap: env.secs("TS_RECONNECT_CAP_SECS", defaults.reconnect.cap)?,
            jitter: env.parse("TS_RECONNECT_JITTER", defaults.reconnect.jitter)?,
            multiplier: defaults.reconnect.multiplier,
            max_attempts: env.parse(
                "TS_RECONNECT_MAX_ATTEMPTS",
                defaults.reconnect.max_attempts,
            )?,
        };

        let http = HttpSettings {
            timeout: env.secs("TS_HTTP_TIMEOUT_SECS", defaults.http.timeout)?,
            retry: RetryPolicy {
                max_attempts: env.parse("TS_HTTP_MAX_ATTEMPTS", defaults.http.retry.max_attempts)?,
                ..defaults.http.retry
            },
        };

        let config = Self {
            environment,
            max_workers: env.parse("TS_MAX_WORKERS", defaults.max_workers)?,
            max_bars_per_call: env.parse("TS_MAX_BARS_PER_CALL", defaults.max_bars_per_call)?,
            heartbeat_timeout: env.secs("TS_HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout)?,
            reconnect,
            http,
            token_expiry_skew: env.secs("TS_TOKEN_EXPIRY_SKEW_SECS", defaults.token_expiry_skew)?,
            base_url: env.get("TS_API_BASE_URL"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::invalid("TS_MAX_WORKERS", "0"));
        }
        if self.max_bars_per_call < 2 {
            return Err(ConfigError::invalid(
                "TS_MAX_BARS_PER_CALL",
                &self.max_bars_per_call.to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::invalid(
                "TS_RECONNECT_JITTER",
                &self.reconnect.jitter.to_string(),
            ));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::invalid("TS_HEARTBEAT_TIMEOUT_SECS", "0"));
        }
        if self.http.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("TS_HTTP_MAX_ATTEMPTS", "0"));
        }
        Ok(())
    }

    /// REST and streaming base URL.
    #[must_use]
    pub fn api_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.api_base_url())
    }

    /// Parallel fetch settings.
    #[must_use]
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            max_workers: self.max_workers,
            ..FetchConfig::default()
        }
    }

    /// Stream session settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_timeout: self.heartbeat_timeout,
            reconnect: self.reconnect,
            ..SessionConfig::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed or is out of range.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Typed access to a variable lookup. Blank values count as unset.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        self.get(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key, &raw))
        })
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::invalid(key, &raw))
        })
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::invalid(key, &raw))
        })
    }
}
