//! Message Router
//!
//! Decodes one inbound frame and decides what happens to each message:
//!
//! | Kind | Action |
//! |------|--------|
//! | `error` | logged, dispatched to error handlers, returned as an acknowledgement |
//! | `subscription`, `listening` | logged, returned as an acknowledgement |
//! | any kind with handlers | dispatched |
//! | anything else | ignored |
//!
//! An undecodable frame is logged and dropped; it never ends the session.
//! An element without a kind is skipped on its own, so its siblings are
//! still routed.

use std::sync::Arc;

use crate::domain::streaming::{MessageEnvelope, MessageKind, StreamEndpoint};
use crate::infrastructure::alpaca::codec::JsonCodec;
use crate::infrastructure::metrics;

use super::handlers::{HandlerRegistry, MessageHandler};

/// What happened to one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteSummary {
    /// Messages decoded from the frame.
    pub messages: usize,
    /// Messages handed to at least one handler.
    pub dispatched: usize,
    /// Handler invocations that failed or panicked.
    pub handler_failures: usize,
    /// Subscription, listening, and error replies, in frame order.
    pub acknowledgements: Vec<MessageEnvelope>,
    /// Elements skipped because they could not be decoded.
    pub skipped: usize,
    /// The frame could not be decoded.
    pub malformed: bool,
}

/// Classifies messages and dispatches them to the registry.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    endpoint: StreamEndpoint,
    codec: JsonCodec,
    handlers: HandlerRegistry,
}

impl MessageRouter {
    /// Create a router with no handlers.
    #[must_use]
    pub fn new(endpoint: StreamEndpoint) -> Self {
        Self {
            endpoint,
            codec: JsonCodec::new(),
            handlers: HandlerRegistry::new(),
        }
    }

    /// Append a handler for `kind`.
    pub fn register(&mut self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.handlers.register(kind, handler);
    }

    /// Decode `frame` and route every message in it, in order.
    pub async fn route(&self, frame: &str) -> RouteSummary {
        metrics::record_frame(self.endpoint);

        let decoded = match self.codec.decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, frame_len = frame.len(), "Dropping malformed frame");
                metrics::record_protocol_error(self.endpoint);
                return RouteSummary {
                    malformed: true,
                    ..RouteSummary::default()
                };
            }
        };

        for skipped in &decoded.skipped {
            tracing::warn!(endpoint = %self.endpoint, error = %skipped, "Skipping undecodable message");
            metrics::record_protocol_error(self.endpoint);
        }

        let mut summary = RouteSummary {
            messages: decoded.envelopes.len(),
            skipped: decoded.skipped.len(),
            ..RouteSummary::default()
        };

        for envelope in decoded.envelopes {
            match envelope.kind() {
                MessageKind::Error => {
                    tracing::error!(
                        endpoint = %self.endpoint,
                        code = envelope.code(),
                        msg = envelope.message().unwrap_or_default(),
                        "Stream error"
                    );
                    self.dispatch(&envelope, &mut summary).await;
                    summary.acknowledgements.push(envelope);
                }
                MessageKind::Subscription | MessageKind::Listening => {
                    tracing::debug!(endpoint = %self.endpoint, ack = %envelope.payload(), "Acknowledgement received");
                    summary.acknowledgements.push(envelope);
                }
                kind if self.handlers.has_handlers(kind) => {
                    self.dispatch(&envelope, &mut summary).await;
                }
                kind => {
                    tracing::trace!(%kind, "Ignoring message without handlers");
                }
            }
        }

        summary
    }

    /// Dispatch a message built by the session, such as a lifecycle event.
    ///
    /// Returns how many handlers failed.
    pub async fn emit(&self, envelope: &MessageEnvelope) -> usize {
        self.handlers.dispatch(envelope).await
    }

    async fn dispatch(&self, envelope: &MessageEnvelope, summary: &mut RouteSummary) {
        if self.handlers.has_handlers(envelope.kind()) {
            summary.dispatched += 1;
            summary.handler_failures += self.handlers.dispatch(envelope).await;
        }
    }
}
