//! Stream Connector Port (Driven Port)
//!
//! Opens a streaming response for a subscription. The returned body is raw
//! bytes; framing and decoding belong to the session.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use super::TransportError;
use crate::domain::{auth::Token, streaming::Subscription};

/// Raw streaming body.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Failure to open a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The token was rejected (401).
    #[error("stream handshake unauthorized")]
    Unauthorized,

    /// The server refused the subscription (non-auth 4xx).
    #[error("stream rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Network failure or server error; worth another attempt.
    #[error("stream unavailable: {0}")]
    Unavailable(String),
}

/// Opens streaming connections.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open the stream for `subscription` authorised with `token`.
    async fn connect(
        &self,
        subscription: &Subscription,
        token: &Token,
    ) -> Result<ByteStream, ConnectError>;
}
