//! Access Tokens
//!
//! Bearer tokens issued by the TradeStation OAuth endpoint. A [`Token`] is
//! immutable: a refresh produces a new value that replaces the old one.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Environment
// =============================================================================

/// Trading environment (simulated vs live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingEnvironment {
    /// Simulated trading environment.
    #[default]
    Sim,
    /// Live trading environment (real money).
    Live,
}

/// Environment name other than `SIM` or `LIVE`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trading environment: {0}")]
pub struct UnknownEnvironment(pub String);

impl TradingEnvironment {
    /// Check if this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sim => "SIM",
            Self::Live => "LIVE",
        }
    }

    /// REST and streaming base URL for this environment.
    #[must_use]
    pub const fn api_base_url(&self) -> &'static str {
        match self {
            Self::Sim => "https://sim-api.tradestation.com/v3",
            Self::Live => "https://api.tradestation.com/v3",
        }
    }
}

impl std::fmt::Display for TradingEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingEnvironment {
    type Err = UnknownEnvironment;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SIM" => Ok(Self::Sim),
            "LIVE" => Ok(Self::Live),
            _ => Err(UnknownEnvironment(s.to_string())),
        }
    }
}

// =============================================================================
// Access Grant
// =============================================================================

/// Raw result of a successful credential refresh.
///
/// The token manager stamps its own environment on the grant to build a
/// [`Token`].
#[derive(Clone, PartialEq, Eq)]
pub struct AccessGrant {
    /// Opaque bearer value.
    pub access_token: String,
    /// Absolute expiry reported by the issuer.
    pub expires_at: DateTime<Utc>,
}

impl AccessGrant {
    /// Create a grant expiring `expires_in` after `issued_at`.
    #[must_use]
    pub fn issued(
        access_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_in: Duration,
    ) -> Self {
        let lifetime = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::MAX);
        Self {
            access_token: access_token.into(),
            expires_at: issued_at.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl std::fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGrant")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Token
// =============================================================================

/// An environment-bound bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: DateTime<Utc>,
    environment: TradingEnvironment,
}

impl Token {
    /// Create a new token.
    #[must_use]
    pub fn new(
        value: impl Into<String>,
        expires_at: DateTime<Utc>,
        environment: TradingEnvironment,
    ) -> Self {
        Self {
            value: value.into(),
            expires_at,
            environment,
        }
    }

    /// Build a token from a refresh grant.
    #[must_use]
    pub fn from_grant(grant: AccessGrant, environment: TradingEnvironment) -> Self {
        Self::new(grant.access_token, grant.expires_at, environment)
    }

    /// Get the opaque token value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Get the expiry instant.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Get the environment this token was issued for.
    #[must_use]
    pub const fn environment(&self) -> TradingEnvironment {
        self.environment
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }

    /// Whether the token can still be served at `now`, keeping `skew` in hand.
    #[must_use]
    pub fn is_fresh_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(skew)
            .is_some_and(|deadline| deadline < self.expires_at)
    }

    /// Whether the token can still be served now.
    #[must_use]
    pub fn is_fresh(&self, skew: Duration) -> bool {
        self.is_fresh_at(Utc::now(), skew)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("environment", &self.environment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("live", TradingEnvironment::Live ; "lowercase live")]
    #[test_case("LIVE", TradingEnvironment::Live ; "uppercase live")]
    #[test_case(" Live ", TradingEnvironment::Live ; "padded live")]
    #[test_case("sim", TradingEnvironment::Sim ; "lowercase sim")]
    fn environment_parsing(input: &str, expected: TradingEnvironment) {
        assert_eq!(input.parse::<TradingEnvironment>().unwrap(), expected);
    }

    #[test_case("paper" ; "unknown name")]
    #[test_case("simulated" ; "prefix of sim")]
    #[test_case("" ; "empty")]
    fn environment_parsing_rejects_unknown(input: &str) {
        assert_eq!(
            input.parse::<TradingEnvironment>().unwrap_err(),
            UnknownEnvironment(input.to_string())
        );
    }

    #[test]
    fn environment_base_urls() {
        assert_eq!(
            TradingEnvironment::Sim.api_base_url(),
            "https://sim-api.tradestation.com/v3"
        );
        assert_eq!(
            TradingEnvironment::Live.api_base_url(),
            "https://api.tradestation.com/v3"
        );
        assert!(TradingEnvironment::Live.is_live());
        assert!(!TradingEnvironment::Sim.is_live());
    }

    #[test]
    fn token_freshness_respects_skew() {
        let now = Utc::now();
        let token = Token::new(
            "abc",
            now + chrono::Duration::seconds(60),
            TradingEnvironment::Sim,
        );

        assert!(token.is_fresh_at(now, Duration::ZERO));
        assert!(token.is_fresh_at(now, Duration::from_secs(30)));
        assert!(!token.is_fresh_at(now, Duration::from_secs(60)));
        assert!(!token.is_fresh_at(now + chrono::Duration::seconds(61), Duration::ZERO));
    }

    #[test]
    fn grant_expiry_from_lifetime() {
        let issued_at = Utc::now();
        let grant = AccessGrant::issued("abc", issued_at, Duration::from_secs(1200));
        assert_eq!(grant.expires_at, issued_at + chrono::Duration::seconds(1200));

        let token = Token::from_grant(grant, TradingEnvironment::Live);
        assert_eq!(token.environment(), TradingEnvironment::Live);
        assert_eq!(token.bearer(), "Bearer abc");
    }

    #[test]
    fn token_redacted_debug() {
        let token = Token::new("secret-token", Utc::now(), TradingEnvironment::Sim);
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));

        let grant = AccessGrant::issued("secret-grant", Utc::now(), Duration::from_secs(1));
        assert!(!format!("{grant:?}").contains("secret-grant"));
    }
}
