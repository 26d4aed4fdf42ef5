//! Session lifecycle.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Authenticated -> Running
//!                                     ^                               |
//!                                     +-------- Reconnecting <--------+
//! ```
//!
//! Every state may move to `Closed`. Failed handshakes fall back to
//! `Disconnected` (first connect) or `Reconnecting` (retry).

use std::fmt;

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No transport, never connected or initial connect failed.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, handshake in progress.
    Authenticating,
    /// Handshake complete, run loop not started.
    Authenticated,
    /// Run loop consuming frames.
    Running,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Shut down by `disconnect()`, `stop()`, or exhausted retries.
    Closed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            Authenticated, Authenticating, Closed, Connecting, Disconnected, Reconnecting, Running,
        };

        matches!(
            (self, next),
            (Disconnected | Closed, Connecting | Reconnecting)
                | (Connecting, Authenticating | Disconnected)
                | (
                    Authenticating,
                    Authenticated | Disconnected | Reconnecting
                )
                | (Authenticated, Running | Reconnecting)
                | (Running, Reconnecting)
                | (Reconnecting, Authenticating)
                | (
                    Disconnected
                        | Connecting
                        | Authenticating
                        | Authenticated
                        | Running
                        | Reconnecting,
                    Closed
                )
        )
    }

    /// Whether the session holds an authenticated connection.
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::Running)
    }

    /// State name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Running => "running",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
