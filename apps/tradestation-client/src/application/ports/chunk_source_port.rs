//! Chunk Source Port (Driven Port)
//!
//! Fetches the bars of a single planned chunk. The bar-chart adapter is the
//! production implementation; tests substitute fakes.

use async_trait::async_trait;

use super::{CredentialError, TransportError};
use crate::domain::bars::{Bar, TimeRange};

/// One chunk could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkFetchError {
    /// Transport failed after its retries.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// A token could not be obtained.
    #[error("credentials: {0}")]
    Credential(#[from] CredentialError),

    /// The response did not contain usable bars.
    #[error("decode: {0}")]
    Decode(String),
}

impl ChunkFetchError {
    /// Whether the failure stems from bad credentials.
    #[must_use]
    pub const fn is_credential_failure(&self) -> bool {
        matches!(self, Self::Credential(_) | Self::Transport(TransportError::Unauthorized))
    }
}

/// Fetches bars for one chunk.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetch all bars inside `chunk` (inclusive bounds), in provider order.
    async fn fetch_chunk(&self, chunk: &TimeRange) -> Result<Vec<Bar>, ChunkFetchError>;
}
