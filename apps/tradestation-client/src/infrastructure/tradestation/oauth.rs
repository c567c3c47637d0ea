//! OAuth refresh-token credential source.
//!
//! Exchanges a long-lived refresh token for short-lived access tokens at the
//! TradeStation sign-in endpoint. When the issuer rotates the refresh token,
//! the new one replaces the held value; otherwise the old one stays.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Client;

use super::api_types::{TokenErrorResponse, TokenResponse};
use crate::application::ports::{CredentialError, CredentialSource};
use crate::domain::auth::AccessGrant;
use crate::infrastructure::config::ConfigError;

/// Default TradeStation token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://signin.tradestation.com/oauth/token";

// =============================================================================
// Credentials
// =============================================================================

/// OAuth client credentials plus the current refresh token.
#[derive(Clone)]
pub struct OAuthCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token_url: String,
}

impl OAuthCredentials {
    /// Create credentials against the default token endpoint.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }

    /// Use a different token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Load from `TS_CLIENT_ID`, `TS_CLIENT_SECRET`, `TS_REFRESH_TOKEN` and
    /// optionally `TS_TOKEN_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyValue(key.to_string()));
            }
            Ok(value)
        };

        let credentials = Self::new(
            required("TS_CLIENT_ID")?,
            required("TS_CLIENT_SECRET")?,
            required("TS_REFRESH_TOKEN")?,
        );
        Ok(match lookup("TS_TOKEN_URL").filter(|url| !url.trim().is_empty()) {
            Some(url) => credentials.with_token_url(url),
            None => credentials,
        })
    }

    /// Client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Token endpoint.
    #[must_use]
    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .finish()
    }
}

// =============================================================================
// Source
// =============================================================================

/// [`CredentialSource`] backed by the OAuth refresh-token grant.
pub struct RefreshTokenSource {
    client: Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    refresh_token: RwLock<String>,
}

impl RefreshTokenSource {
    /// Create a source with the given request timeout.
    pub fn new(credentials: OAuthCredentials, timeout: Duration) -> Result<Self, CredentialError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::Network(e.to_string()))?;

        Ok(Self {
            client,
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            token_url: credentials.token_url,
            refresh_token: RwLock::new(credentials.refresh_token),
        })
    }

    /// Whether the held refresh token equals `candidate`.
    #[must_use]
    pub fn holds_refresh_token(&self, candidate: &str) -> bool {
        *self.refresh_token.read() == candidate
    }
}

#[async_trait]
impl CredentialSource for RefreshTokenSource {
    async fn refresh(&self) -> Result<AccessGrant, CredentialError> {
        let refresh_token = self.refresh_token.read().clone();
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];

        let issued_at = Utc::now();
        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TokenErrorResponse>(&body).map_or_else(
                |_| body.trim().to_string(),
                |err| err.error_description.unwrap_or(err.error),
            );
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;
        if body.access_token.is_empty() {
            return Err(CredentialError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }

        if let Some(rotated) = body.refresh_token.filter(|t| !t.is_empty()) {
            *self.refresh_token.write() = rotated;
            tracing::debug!("Refresh token rotated");
        }

        Ok(AccessGrant::issued(
            body.access_token,
            issued_at,
            Duration::from_secs(body.expires_in),
        ))
    }
}

impl std::fmt::Debug for RefreshTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenSource")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}
