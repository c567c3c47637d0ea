//! Port Interfaces
//!
//! Contracts between the core services and the outside world, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CredentialSource`: exchanges held credentials for an access grant
//! - `Transport`: signed request/response calls with timeout and retry
//! - `StreamConnector`: opens a long-lived streaming response body
//! - `ChunkSource`: fetches the bars of one planned chunk

mod chunk_source_port;
mod credential_source_port;
mod stream_connector_port;
mod transport_port;

pub use chunk_source_port::{ChunkFetchError, ChunkSource};
pub use credential_source_port::{CredentialError, CredentialSource};
pub use stream_connector_port::{ByteStream, ConnectError, StreamConnector};
pub use transport_port::{ApiRequest, ApiResponse, HttpMethod, Transport, TransportError};
