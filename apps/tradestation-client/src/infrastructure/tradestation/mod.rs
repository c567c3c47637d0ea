//! TradeStation Adapters
//!
//! Concrete implementations of the driven ports against the TradeStation v3
//! API:
//!
//! - **REST**: signed calls with retry, bar-chart chunk source
//! - **OAuth**: refresh-token grant
//! - **Streams**: chunked HTTP responses, one JSON object per line

pub mod api_types;
pub mod bar_charts;
pub mod http_client;
pub mod oauth;
pub mod retry;
pub mod stream_connector;

pub use api_types::{ApiErrorBody, BarChartResponse, RawBar, WireError, WireNumber};
pub use bar_charts::BarChartSource;
pub use http_client::HttpTransport;
pub use oauth::{DEFAULT_TOKEN_URL, OAuthCredentials, RefreshTokenSource};
pub use retry::{Backoff, RetryPolicy, StatusClass};
pub use stream_connector::{HttpStreamConnector, STREAM_ACCEPT};
