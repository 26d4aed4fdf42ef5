//! Alpaca Stream Adapters
//!
//! Everything that speaks Alpaca's streaming protocol:
//!
//! - **Handshake**: credentials, auth request, reply evaluation
//! - **Codec**: JSON frames to envelopes and back
//! - **Connection**: one transport plus the handshake, no retries
//! - **Reconnect**: bounded exponential backoff
//! - **Transports**: WebSocket (with heartbeat) and in-memory

pub mod auth;
pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod memory;
pub mod messages;
pub mod reconnect;
pub mod websocket;

pub use auth::{AUTH_TIMEOUT, AuthError, AuthOutcome, Credentials, evaluate_auth_reply};
pub use codec::{DecodedFrame, JsonCodec};
pub use connection::ConnectionManager;
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
pub use memory::{MemoryConnector, MemoryPeer, MemoryPeers, MemoryTransport};
pub use messages::{
    AuthRequest, AuthorizationMessage, ErrorMessage, ListenRequest, SubscriptionAck,
    SubscriptionRequest,
};
pub use reconnect::{BackoffConfig, BackoffPolicy};
pub use websocket::{WebSocketConnector, WebSocketTransport};
