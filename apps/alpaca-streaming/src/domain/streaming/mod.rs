//! Streaming Domain Types
//!
//! Codec-agnostic types shared by the connection, router, and session:
//!
//! - `StreamEndpoint`: the fixed set of Alpaca push feeds
//! - `MessageKind` / `MessageEnvelope`: a decoded message and its discriminator
//! - `SessionState`: the session lifecycle and its legal transitions

mod endpoint;
mod envelope;
mod state;

pub use endpoint::StreamEndpoint;
pub use envelope::{MessageEnvelope, MessageKind};
pub use state::SessionState;
