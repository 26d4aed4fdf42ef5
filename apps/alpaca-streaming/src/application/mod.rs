//! Application Layer - Session orchestration and port definitions.
//!
//! This layer drives the streaming session and defines the transport
//! contracts the infrastructure adapters implement.

/// Port interfaces for transports.
pub mod ports;

/// Session, routing, and handler services.
pub mod services;
