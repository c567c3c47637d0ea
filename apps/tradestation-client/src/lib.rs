#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! TradeStation Client - Market Data Access Layer
//!
//! Client-side core for the TradeStation v3 API: token lifecycle, bulk
//! historical bars fetched as parallel chunks, and live streams that survive
//! silent disconnects.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Value types with no I/O
//!   - `auth`: tokens and trading environments
//!   - `bars`: time ranges, bars, merged results
//!   - `streaming`: subscriptions, messages, session states
//!
//! - **Application**: Services and port definitions
//!   - `ports`: credential, transport, stream and chunk contracts
//!   - `services`: token manager, chunk planner, parallel fetcher, merger
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `tradestation`: reqwest transport, OAuth refresh, bar charts, stream connector
//!   - `stream`: framing codec, heartbeat, reconnect backoff, session
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! CredentialSource ──► TokenManager ──┬──► ChunkPlanner ──► ParallelFetcher ──► Merger ──► caller
//!                                     │                          │
//!                                     │                     Transport (N calls)
//!                                     │
//!                                     └──► StreamSession ──► StreamConnector ──► consumer
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Tokens, bars and streaming types.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Client facade.
pub mod client;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::auth::{AccessGrant, Token, TradingEnvironment, UnknownEnvironment};
pub use domain::bars::{Bar, BarUnit, MergedResult, TimeRange, TimeRangeError};
pub use domain::streaming::{
    DepthView, MessageKind, SessionState, StreamMessage, StreamStatus, Subscription,
    SubscriptionError,
};

// Ports
pub use application::ports::{
    ChunkFetchError, ChunkSource, ConnectError, CredentialError, CredentialSource,
    StreamConnector, Transport, TransportError,
};

// Services
pub use application::services::{
    CancelPolicy, ChunkPlanner, FetchConfig, FetchReport, HistoricalBars, HistoricalError,
    HistoricalRequest, MergeError, Merger, ParallelFetcher, PlanError, Recovery, TokenManager,
};

// Infrastructure
pub use infrastructure::config::{ClientConfig, ConfigError};
pub use infrastructure::metrics::describe_metrics;
pub use infrastructure::stream::{
    ReconnectBackoff, SessionConfig, SessionDeps, SessionError, SessionEvent, SessionHandle,
    StreamSession,
};
pub use infrastructure::telemetry::{TelemetryConfig, init as init_telemetry};
pub use infrastructure::tradestation::{
    BarChartSource, HttpStreamConnector, HttpTransport, OAuthCredentials, RefreshTokenSource,
};

// Facade
pub use client::{ClientError, TradeStationClient};
