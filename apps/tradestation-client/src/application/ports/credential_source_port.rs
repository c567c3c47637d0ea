//! Credential Source Port (Driven Port)
//!
//! Exchanges long-lived credentials (client id, secret, refresh token) for a
//! short-lived access grant. Storage of those credentials is owned by the
//! adapter.

use async_trait::async_trait;

use crate::domain::auth::AccessGrant;

/// Credential refresh error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The issuer rejected the credentials.
    #[error("credential refresh rejected ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the issuer.
        status: u16,
        /// Issuer error description.
        message: String,
    },

    /// The issuer could not be reached.
    #[error("credential refresh failed: {0}")]
    Network(String),

    /// The issuer answered with something unusable.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// A required credential is not configured.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

impl CredentialError {
    /// Whether the credentials themselves are bad (retrying will not help).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::MissingCredential(_))
    }
}

/// Source of fresh access grants.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Exchange the held refresh credentials for a new access grant.
    async fn refresh(&self) -> Result<AccessGrant, CredentialError>;
}
