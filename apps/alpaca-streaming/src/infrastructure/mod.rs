//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the Alpaca protocol adapters, the transport
//! implementations of the application ports, and the ambient concerns
//! (configuration, metrics, tracing).

/// Alpaca protocol, connection, and transport adapters.
pub mod alpaca;

/// Configuration loaded from environment variables.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
