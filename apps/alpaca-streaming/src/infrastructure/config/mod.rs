//! Configuration Module
//!
//! Session tuning and client configuration loaded from environment variables.

mod settings;

pub use settings::{ClientConfig, ConfigError, StreamConfig};
