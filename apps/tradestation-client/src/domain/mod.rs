//! Domain Layer - Core types for tokens, bars and streaming.
//!
//! This layer contains the value types shared by the fetch and stream
//! paths. Nothing here performs I/O.

/// Access tokens and trading environments.
pub mod auth;

/// Time ranges, bar units, bars and merged results.
pub mod bars;

/// Stream subscriptions, messages and session lifecycle.
pub mod streaming;
