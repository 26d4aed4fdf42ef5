//! Error taxonomy for the streaming client.
//!
//! | Error | Raised by | Effect |
//! |-------|-----------|--------|
//! | `ConnectError` | handshake | fatal unless the session retries it |
//! | `TransportError` | send/receive | connection marked lost, run loop reconnects |
//! | `ProtocolError` | frame decoding | frame logged and dropped |
//! | `HandlerError` | caller handlers | logged and isolated |
//! | `StreamError` | session operations | returned to the caller |
//!
//! `run()` only returns an error when reconnection is exhausted or the
//! connection is lost with auto-reconnect disabled.

use std::time::Duration;

use thiserror::Error;

use crate::infrastructure::alpaca::auth::AuthError;

/// Mid-stream transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No transport is open.
    #[error("not connected")]
    NotConnected,

    /// The session has not completed the auth handshake.
    #[error("not authenticated: connect before subscribing")]
    NotAuthenticated,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// No pong arrived within the keepalive timeout.
    #[error("keepalive timeout: no pong within {0:?}")]
    KeepaliveTimeout(Duration),

    /// The connector refused to open a transport.
    #[error("connection refused: {0}")]
    Refused(String),

    /// A binary frame was not valid UTF-8.
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,

    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failure to establish an authenticated connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The transport could not be opened or failed during the handshake.
    #[error("transport failed during handshake: {0}")]
    Transport(#[from] TransportError),

    /// The handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The server rejected the credentials.
    #[error("authentication rejected: {0}")]
    AuthRejected(#[from] AuthError),

    /// The auth reply carried neither a success nor an error.
    #[error("inconclusive auth reply: {0}")]
    Inconclusive(String),

    /// A handshake frame could not be decoded or encoded.
    #[error("handshake protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Malformed or undecodable frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON, or a request could not be encoded.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is JSON but neither an object nor an array.
    #[error("expected a JSON object or array, got {0}")]
    UnexpectedShape(&'static str),

    /// Array element is not an object.
    #[error("expected a JSON object element, got {0}")]
    NotAnObject(&'static str),

    /// Object has no `"T"` or `"stream"` discriminator.
    #[error("message has no kind discriminator: {0}")]
    MissingKind(String),
}

/// Failure raised by a caller-supplied handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler reported a failure.
    #[error("{0}")]
    Failed(String),

    /// Handler propagated an arbitrary error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Build a failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Error returned by session operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Transport failure, or the session is not authenticated.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Connecting or authenticating failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A request could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No acknowledgement arrived in time.
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// The server answered a request with an error.
    #[error("request rejected ({code}): {message}")]
    Rejected {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
    },

    /// A subscribe or unsubscribe named no symbols.
    #[error("subscription selection is empty")]
    EmptySubscription,

    /// Reconnection gave up after the configured number of attempts.
    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The connection was lost and auto-reconnect is disabled.
    #[error("connection lost and auto-reconnect is disabled")]
    ConnectionLost,
}

impl StreamError {
    /// Whether this error ended the session for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ReconnectExhausted { .. } | Self::ConnectionLost
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors() {
        assert!(StreamError::ReconnectExhausted { attempts: 10 }.is_terminal());
        assert!(StreamError::ConnectionLost.is_terminal());
        assert!(!StreamError::EmptySubscription.is_terminal());
        assert!(!StreamError::from(TransportError::Closed).is_terminal());
    }

    #[test]
    fn messages_carry_context() {
        let err = StreamError::Rejected {
            code: 405,
            message: "symbol limit exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "request rejected (405): symbol limit exceeded");

        let err = ConnectError::from(AuthError::InvalidCredentials);
        assert!(err.to_string().starts_with("authentication rejected"));
    }
}
