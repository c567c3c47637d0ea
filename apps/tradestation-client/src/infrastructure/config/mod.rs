//! Configuration Module
//!
//! Client configuration loaded from environment variables.

mod settings;

pub use settings::{BackoffSettings, ClientConfig, ConfigError, HttpSettings};
