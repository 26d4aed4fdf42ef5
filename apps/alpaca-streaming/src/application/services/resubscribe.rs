//! Resubscribe Strategy
//!
//! What a session replays after every successful (re)connect. Market data
//! streams replay the full desired subscription set as one message; the
//! trade updates stream re-issues its `listen` request.

use crate::domain::streaming::StreamEndpoint;
use crate::domain::subscription::{SubscriptionDelta, SubscriptionSet};
use crate::error::ProtocolError;
use crate::infrastructure::alpaca::codec::JsonCodec;
use crate::infrastructure::alpaca::messages::{ListenRequest, SubscriptionRequest};

/// Builds the replay message for a fresh connection.
#[derive(Debug, Clone, Copy)]
pub enum ResubscribeStrategy {
    /// Subscribe to the whole snapshot in one message. Nothing if empty.
    MarketData,
    /// Send `{"action":"listen","data":{"streams":["trade_updates"]}}`.
    TradeUpdates,
    /// Caller-defined replay. `None` means send nothing.
    Custom(fn(&SubscriptionSet) -> Option<String>),
}

impl ResubscribeStrategy {
    /// Strategy matching the endpoint's protocol.
    #[must_use]
    pub const fn for_endpoint(endpoint: StreamEndpoint) -> Self {
        if endpoint.is_trading() {
            Self::TradeUpdates
        } else {
            Self::MarketData
        }
    }

    /// Build the replay frame for `snapshot`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be encoded.
    pub fn build_message(&self, snapshot: &SubscriptionSet) -> Result<Option<String>, ProtocolError> {
        let codec = JsonCodec::new();
        match self {
            Self::MarketData => {
                if snapshot.is_empty() {
                    return Ok(None);
                }
                let delta = SubscriptionDelta::subscribe_all(snapshot.clone());
                codec.encode(&SubscriptionRequest::from(&delta)).map(Some)
            }
            Self::TradeUpdates => codec.encode(&ListenRequest::trade_updates()).map(Some),
            Self::Custom(build) => Ok(build(snapshot)),
        }
    }
}
