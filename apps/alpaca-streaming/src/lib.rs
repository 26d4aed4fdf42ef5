#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Alpaca Streaming - Real-time Market Data and Trade Update Client
//!
//! Keeps one authenticated WebSocket session to an Alpaca push feed (IEX,
//! SIP, crypto, or paper/live trade updates), routes every inbound message
//! to the handlers registered for its kind, and survives connection loss by
//! reconnecting with capped exponential backoff and replaying the desired
//! subscriptions.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Types with no I/O
//!   - `streaming`: Endpoints, message envelopes, session states
//!   - `subscription`: Desired subscriptions per channel
//!
//! - **Application**: Session logic and port definitions
//!   - `ports`: `Connector` / `StreamTransport`
//!   - `services`: Session run loop, routing, handler dispatch, resubscription
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `alpaca`: Auth handshake, codec, backoff, WebSocket and in-memory transports
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//!                ┌──────────────────────────────────────────────┐
//! Alpaca WS ────►│ ConnectionManager ──► MessageRouter ──► Handlers
//!      ▲         │        ▲                                     │
//!      │         │        └── reconnect + replay ◄── Registry   │
//!      └─────────┤                 StreamSession                │
//!  subscribe /   └──────────────────────────────────────────────┘
//!  unsubscribe
//! ```
//!
//! # Example
//!
//! ```ignore
//! use alpaca_streaming::{Credentials, StreamConfig, StreamEndpoint, StreamSession, SubscriptionSet, handler_fn};
//!
//! let credentials = Credentials::new("key", "secret")?;
//! let mut session = StreamSession::websocket(StreamEndpoint::Iex, credentials, StreamConfig::default());
//! session.on_trade(handler_fn(|msg| {
//!     println!("{:?}", msg.symbol());
//!     Ok(())
//! }));
//! session.connect().await?;
//! session.subscribe(&SubscriptionSet::new().with_trades(["AAPL"])).await?;
//! session.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Session services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Error types.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{MessageEnvelope, MessageKind, SessionState, StreamEndpoint};
pub use domain::subscription::{Channel, SubscriptionSet};

// Session
pub use application::ports::{Connector, StreamTransport};
pub use application::services::{
    MessageHandler, ResubscribeStrategy, StopHandle, StreamSession, async_handler_fn, handler_fn,
};

// Adapters
pub use infrastructure::alpaca::{Credentials, MemoryConnector, MemoryPeer, WebSocketConnector};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, StreamConfig};

// Errors
pub use error::{ConnectError, HandlerError, ProtocolError, StreamError, TransportError};

// Observability
pub use infrastructure::metrics::init_metrics;
