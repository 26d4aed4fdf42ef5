//! Port Interfaces
//!
//! Contracts between the session and the physical connection, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: opens a transport to a URL
//! - `StreamTransport`: one open bidirectional text-frame connection
//!
//! Adapters: `WebSocketConnector` for Alpaca's servers and
//! `MemoryConnector` for in-process tests.

use async_trait::async_trait;

use crate::error::TransportError;

/// One open, bidirectional, text-frame connection.
///
/// Keepalive is the transport's concern: a dead peer surfaces as an error
/// from `receive`.
#[async_trait]
pub trait StreamTransport: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Wait for the next text frame.
    ///
    /// Cancel-safe: dropping the future loses no frame.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport produced by this connector.
    type Transport: StreamTransport + 'static;

    /// Open a transport to `url`.
    async fn open(&self, url: &str) -> Result<Self::Transport, TransportError>;
}
