//! Alpaca WebSocket Authentication
//!
//! Alpaca requires authentication within 10 seconds of connection
//! establishment.
//!
//! # Authentication Flow
//!
//! ## Market Data Streams (IEX, SIP, Crypto)
//! 1. Connect to WebSocket endpoint
//! 2. Receive `[{"T":"success","msg":"connected"}]` from server
//! 3. Send `{"action":"auth","key":"...","secret":"..."}`
//! 4. Receive `[{"T":"success","msg":"authenticated"}]` or an error
//!
//! ## Trade Updates Stream
//! 1. Connect to WebSocket endpoint (no greeting)
//! 2. Send `{"action":"auth","key":"...","secret":"..."}`
//! 3. Receive `{"stream":"authorization","data":{"status":"authorized",...}}`
//!
//! # Error Codes
//!
//! - 401: Not authenticated
//! - 402: Authentication failed (invalid credentials)
//! - 403: Already authenticated
//! - 404: Authentication timeout
//! - 406: Connection limit exceeded

use std::time::Duration;

use thiserror::Error;

use super::messages::{AuthRequest, AuthorizationMessage, ErrorMessage};
use crate::domain::streaming::{MessageEnvelope, MessageKind};

// =============================================================================
// Constants
// =============================================================================

/// Maximum time allowed for authentication after connection.
/// Alpaca terminates connections that don't authenticate within 10 seconds.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Not authenticated (must authenticate before subscribing).
    #[error("not authenticated: must authenticate before making requests")]
    NotAuthenticated,

    /// Authentication failed (invalid credentials).
    #[error("authentication failed: invalid API key or secret")]
    InvalidCredentials,

    /// Already authenticated (connection was already authenticated).
    #[error("already authenticated: connection is already authenticated")]
    AlreadyAuthenticated,

    /// Authentication timeout (took longer than 10 seconds).
    #[error("authentication timeout: must authenticate within 10 seconds")]
    Timeout,

    /// Connection limit exceeded.
    #[error("connection limit exceeded: too many concurrent connections")]
    ConnectionLimitExceeded,

    /// Credentials were missing or malformed before any request was made.
    #[error("invalid credentials: {0}")]
    InvalidInput(String),

    /// Unexpected error from server.
    #[error("server error ({code}): {message}")]
    ServerError {
        /// Error code from server
        code: i32,
        /// Error message from server
        message: String,
    },
}

impl From<&ErrorMessage> for AuthError {
    fn from(err: &ErrorMessage) -> Self {
        match err.code {
            401 => Self::NotAuthenticated,
            402 => Self::InvalidCredentials,
            403 => Self::AlreadyAuthenticated,
            404 => Self::Timeout,
            406 => Self::ConnectionLimitExceeded,
            code => Self::ServerError {
                code,
                message: err.msg.clone(),
            },
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Alpaca API credentials.
///
/// The `Debug` and `Display` implementations never print the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either key or secret is empty.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, AuthError> {
        let key = key.into();
        let secret = secret.into();

        if key.trim().is_empty() {
            return Err(AuthError::InvalidInput("API key cannot be empty".to_string()));
        }
        if secret.trim().is_empty() {
            return Err(AuthError::InvalidInput(
                "API secret cannot be empty".to_string(),
            ));
        }

        Ok(Self { key, secret })
    }

    /// Get the API key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the API secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Build the authentication request for any stream.
    #[must_use]
    pub fn auth_request(&self) -> AuthRequest<'_> {
        AuthRequest::new(&self.key, &self.secret)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials(key={})", self.key)
    }
}

// =============================================================================
// Auth Reply Evaluation
// =============================================================================

/// Result of inspecting an auth reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The server accepted the credentials.
    Authenticated,
    /// The server rejected the credentials.
    Rejected(AuthError),
    /// Nothing in the reply settled the handshake.
    Inconclusive,
}

/// Inspect every element of an auth reply; the first success or failure wins.
///
/// Recognizes `{"T":"success","msg":"authenticated"}`, `{"T":"error",...}`,
/// and the trade stream's `{"stream":"authorization",...}` reply. A
/// `connected` greeting batched into the same frame is skipped.
#[must_use]
pub fn evaluate_auth_reply(envelopes: &[MessageEnvelope]) -> AuthOutcome {
    for envelope in envelopes {
        match envelope.kind() {
            MessageKind::Success if envelope.message() == Some("authenticated") => {
                return AuthOutcome::Authenticated;
            }
            MessageKind::Error => {
                let error = envelope
                    .deserialize::<ErrorMessage>()
                    .map_or_else(|_| AuthError::InvalidCredentials, |msg| AuthError::from(&msg));
                return AuthOutcome::Rejected(error);
            }
            MessageKind::Authorization => {
                return match envelope.deserialize::<AuthorizationMessage>() {
                    Ok(msg) if msg.is_authorized() => AuthOutcome::Authenticated,
                    _ => AuthOutcome::Rejected(AuthError::InvalidCredentials),
                };
            }
            _ => {}
        }
    }

    AuthOutcome::Inconclusive
}
