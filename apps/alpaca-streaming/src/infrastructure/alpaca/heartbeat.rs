//! Heartbeat
//!
//! Tracks connection health through periodic ping/pong. The transport asks
//! for the next deadline, sleeps until it, then polls for the action to take.
//! A pong that does not arrive within the timeout surfaces as a transport
//! failure, which the session handles like any other disconnect.

use std::time::Duration;

use tokio::time::Instant;

use crate::infrastructure::config::StreamConfig;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages. Zero disables pings.
    pub ping_interval: Duration,
    /// Timeout for pong response before connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Derive the keepalive settings of a stream configuration.
    #[must_use]
    pub const fn from_stream_config(config: &StreamConfig) -> Self {
        Self::new(config.keepalive_interval, config.keepalive_timeout)
    }

    /// Whether pings are sent at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

/// What the transport should do when a heartbeat deadline fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping now.
    SendPing,
    /// Nothing due yet.
    Wait,
    /// The outstanding ping was never answered.
    Timeout,
}

/// Per-connection heartbeat state.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    config: HeartbeatConfig,
    last_ping: Instant,
    awaiting_pong_since: Option<Instant>,
}

impl HeartbeatState {
    /// Start tracking a connection opened at `now`.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_ping: now,
            awaiting_pong_since: None,
        }
    }

    /// Heartbeat configuration.
    #[must_use]
    pub const fn config(&self) -> HeartbeatConfig {
        self.config
    }

    /// When the next action is due, or `None` if pings are disabled.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.config.is_enabled() {
            return None;
        }

        Some(self.awaiting_pong_since.map_or_else(
            || self.last_ping + self.config.ping_interval,
            |since| since + self.config.pong_timeout,
        ))
    }

    /// Decide what to do at `now`.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if !self.config.is_enabled() {
            return HeartbeatAction::Wait;
        }

        match self.awaiting_pong_since {
            Some(since) if now >= since + self.config.pong_timeout => HeartbeatAction::Timeout,
            Some(_) => HeartbeatAction::Wait,
            None if now >= self.last_ping + self.config.ping_interval => {
                self.last_ping = now;
                self.awaiting_pong_since = Some(now);
                HeartbeatAction::SendPing
            }
            None => HeartbeatAction::Wait,
        }
    }

    /// Record a pong, or any inbound frame, as proof of life.
    pub const fn record_pong(&mut self) {
        self.awaiting_pong_since = None;
    }

    /// Check if we're currently waiting for a pong.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.awaiting_pong_since.is_some()
    }
}
