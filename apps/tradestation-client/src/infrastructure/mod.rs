//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// TradeStation REST, OAuth and streaming adapters.
pub mod tradestation;

/// Stream framing, liveness and the session state machine.
pub mod stream;

/// Configuration loaded from the environment.
pub mod config;

/// Metric names and recorders.
pub mod metrics;

/// Tracing subscriber initialisation.
pub mod telemetry;
