//! Prometheus Metrics Module
//!
//! Session instrumentation through the `metrics` facade. Until a recorder is
//! installed every call is a no-op, so the library never requires one.
//!
//! # Metrics
//!
//! - `alpaca_stream_frames_received_total{endpoint}`
//! - `alpaca_stream_messages_dispatched_total{kind}`
//! - `alpaca_stream_handler_failures_total{kind}`
//! - `alpaca_stream_protocol_errors_total{endpoint}`
//! - `alpaca_stream_reconnects_total{endpoint}`
//! - `alpaca_stream_connected{endpoint}` (1 while authenticated)
//! - `alpaca_stream_subscriptions{endpoint,channel}`

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::streaming::{MessageKind, SessionState, StreamEndpoint};
use crate::domain::subscription::{Channel, SubscriptionSet};

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Port 0 leaves metrics disabled. Calling again after a successful install
/// is a no-op.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<Option<SocketAddr>, BuildError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(addr) = INSTALLED.get() {
        return Ok(Some(*addr));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(Some(*INSTALLED.get_or_init(|| addr)))
}

fn register_metrics() {
    describe_counter!(
        "alpaca_stream_frames_received_total",
        "Total frames received from Alpaca streams"
    );
    describe_counter!(
        "alpaca_stream_messages_dispatched_total",
        "Total messages handed to handlers"
    );
    describe_counter!(
        "alpaca_stream_handler_failures_total",
        "Total handler invocations that failed or panicked"
    );
    describe_counter!(
        "alpaca_stream_protocol_errors_total",
        "Total frames dropped as undecodable"
    );
    describe_counter!(
        "alpaca_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "alpaca_stream_connected",
        "Whether the session is authenticated (1) or not (0)"
    );
    describe_gauge!(
        "alpaca_stream_subscriptions",
        "Desired symbols per channel"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one inbound frame.
pub fn record_frame(endpoint: StreamEndpoint) {
    counter!("alpaca_stream_frames_received_total", "endpoint" => endpoint.as_str()).increment(1);
}

/// Record a frame dropped as undecodable.
pub fn record_protocol_error(endpoint: StreamEndpoint) {
    counter!("alpaca_stream_protocol_errors_total", "endpoint" => endpoint.as_str()).increment(1);
}

/// Record a message handed to handlers.
pub fn record_dispatched(kind: &MessageKind) {
    counter!(
        "alpaca_stream_messages_dispatched_total",
        "kind" => kind.as_tag().to_string()
    )
    .increment(1);
}

/// Record a failed or panicking handler.
pub fn record_handler_failure(kind: &MessageKind) {
    counter!(
        "alpaca_stream_handler_failures_total",
        "kind" => kind.as_tag().to_string()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt(endpoint: StreamEndpoint) {
    counter!("alpaca_stream_reconnects_total", "endpoint" => endpoint.as_str()).increment(1);
}

/// Publish the session state as the connection gauge.
pub fn set_session_state(endpoint: StreamEndpoint, state: SessionState) {
    gauge!("alpaca_stream_connected", "endpoint" => endpoint.as_str()).set(connected_value(state));
}

/// Publish the desired symbol count of every channel.
pub fn set_subscriptions(endpoint: StreamEndpoint, desired: &SubscriptionSet) {
    for channel in Channel::ALL {
        #[allow(clippy::cast_precision_loss)]
        let count = desired.symbols(channel).len() as f64;
        gauge!(
            "alpaca_stream_subscriptions",
            "endpoint" => endpoint.as_str(),
            "channel" => channel.wire_key()
        )
        .set(count);
    }
}

const fn connected_value(state: SessionState) -> f64 {
    if state.is_authenticated() { 1.0 } else { 0.0 }
}

// =============================================================================
// Tests
// =============================================================================
