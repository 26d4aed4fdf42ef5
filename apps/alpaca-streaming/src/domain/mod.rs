//! Domain Layer - Core streaming types and session rules.
//!
//! This layer holds the types that describe a streaming session without
//! touching the network: which feed to talk to, what the session should be
//! subscribed to, what a decoded message looks like, and which lifecycle
//! transitions are legal.

/// Endpoints, message envelopes, and session lifecycle states.
pub mod streaming;

/// Desired-subscription tracking per channel.
pub mod subscription;
