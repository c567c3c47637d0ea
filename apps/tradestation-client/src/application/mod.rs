//! Application Layer - Services and port definitions.
//!
//! This layer holds the token, planning, fetching and merging services and
//! the port interfaces the infrastructure adapters implement.

/// Port interfaces for external systems (credentials, HTTP, streams).
pub mod ports;

/// Application services for historical fetches and token management.
pub mod services;
