//! Alpaca WebSocket Message Types
//!
//! Wire types for the control plane of Alpaca's streams. Data messages
//! (trades, quotes, bars, order updates) stay as untyped envelopes; only the
//! frames the client itself must read or write are modelled here.
//!
//! # Outbound
//! - `AuthRequest`: `{"action":"auth","key":"...","secret":"..."}`
//! - `SubscriptionRequest`: `{"action":"subscribe","trades":[...],...}`
//! - `ListenRequest`: `{"action":"listen","data":{"streams":["trade_updates"]}}`
//!
//! # Inbound
//! - `ErrorMessage`: `{"T":"error","code":402,"msg":"auth failed"}`
//! - `AuthorizationMessage`: `{"stream":"authorization","data":{"status":"authorized"}}`
//! - `SubscriptionAck`: `{"T":"subscription","trades":["AAPL"],...}`
//!
//! # References
//!
//! - [Stock Streaming](https://docs.alpaca.markets/docs/real-time-stock-pricing-data)
//! - [Trade Updates](https://docs.alpaca.markets/docs/websocket-streaming)

use serde::{Deserialize, Serialize};

use crate::domain::subscription::{Channel, SubscriptionDelta, SubscriptionSet};

// =============================================================================
// Inbound Control Messages
// =============================================================================

/// Error message with code and description.
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    #[serde(default)]
    pub code: i32,

    /// Error message
    #[serde(default)]
    pub msg: String,
}

impl ErrorMessage {
    /// Whether this error can be the server's reply to a subscribe,
    /// unsubscribe, or listen request.
    ///
    /// Auth-state errors (402-404), connection limits (406), and slow-client
    /// notices (407) describe the stream itself and can arrive at any time.
    #[must_use]
    pub const fn answers_request(&self) -> bool {
        !matches!(self.code, 402..=404 | 406 | 407)
    }
}

/// Authorization reply from the trade updates stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationMessage {
    /// Stream name (always "authorization")
    pub stream: String,

    /// Authorization data
    pub data: AuthorizationData,
}

/// Authorization reply data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationData {
    /// Status: "authorized" or "unauthorized"
    pub status: String,

    /// Action echoed by the server
    #[serde(default)]
    pub action: String,
}

impl AuthorizationMessage {
    /// Check if authorization succeeded.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.data.status == "authorized"
    }
}

/// Subscription acknowledgement: the server's view of active subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubscriptionAck {
    /// Trade symbols
    #[serde(default)]
    pub trades: Vec<String>,

    /// Quote symbols
    #[serde(default)]
    pub quotes: Vec<String>,

    /// Bar symbols
    #[serde(default)]
    pub bars: Vec<String>,

    /// Daily bar symbols
    #[serde(default, rename = "dailyBars")]
    pub daily_bars: Vec<String>,

    /// Status symbols
    #[serde(default)]
    pub statuses: Vec<String>,

    /// LULD symbols
    #[serde(default)]
    pub lulds: Vec<String>,
}

impl SubscriptionAck {
    /// Convert to a subscription set.
    #[must_use]
    pub fn to_set(&self) -> SubscriptionSet {
        SubscriptionSet::new()
            .with(Channel::Trades, &self.trades)
            .with(Channel::Quotes, &self.quotes)
            .with(Channel::Bars, &self.bars)
            .with(Channel::DailyBars, &self.daily_bars)
            .with(Channel::Statuses, &self.statuses)
            .with(Channel::Lulds, &self.lulds)
    }
}

// =============================================================================
// Outbound Messages (Client -> Server)
// =============================================================================

/// Authentication request, used by market data and trade update streams alike.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    /// Action: "auth"
    pub action: &'static str,

    /// API key
    pub key: &'a str,

    /// API secret
    pub secret: &'a str,
}

impl<'a> AuthRequest<'a> {
    /// Create a new authentication request.
    #[must_use]
    pub const fn new(key: &'a str, secret: &'a str) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// Subscribe or unsubscribe request for market data streams.
///
/// Empty channels are omitted from the wire message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Action: "subscribe" or "unsubscribe"
    pub action: String,

    /// Trade symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<String>,

    /// Quote symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<String>,

    /// Bar symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bars: Vec<String>,

    /// Daily bar symbols
    #[serde(skip_serializing_if = "Vec::is_empty", rename = "dailyBars")]
    pub daily_bars: Vec<String>,

    /// Status symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<String>,

    /// LULD symbols
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lulds: Vec<String>,
}

impl From<&SubscriptionDelta> for SubscriptionRequest {
    fn from(delta: &SubscriptionDelta) -> Self {
        let list = |channel: Channel| -> Vec<String> {
            delta.symbols.symbols(channel).iter().cloned().collect()
        };

        Self {
            action: delta.action.as_str().to_string(),
            trades: list(Channel::Trades),
            quotes: list(Channel::Quotes),
            bars: list(Channel::Bars),
            daily_bars: list(Channel::DailyBars),
            statuses: list(Channel::Statuses),
            lulds: list(Channel::Lulds),
        }
    }
}

/// Listen request for the trade updates stream.
#[derive(Debug, Clone, Serialize)]
pub struct ListenRequest {
    /// Action: "listen"
    pub action: &'static str,

    /// Listen data
    pub data: ListenData,
}

/// Listen data for the trade updates stream.
#[derive(Debug, Clone, Serialize)]
pub struct ListenData {
    /// Streams to listen to
    pub streams: Vec<String>,
}

impl ListenRequest {
    /// Create a listen request for trade updates.
    #[must_use]
    pub fn trade_updates() -> Self {
        Self {
            action: "listen",
            data: ListenData {
                streams: vec!["trade_updates".to_string()],
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::subscription::SubscriptionRegistry;

    #[test]
    fn auth_request_shape() {
        let value = serde_json::to_value(AuthRequest::new("key", "secret")).unwrap();
        assert_eq!(
            value,
            json!({"action": "auth", "key": "key", "secret": "secret"})
        );
    }

    #[test]
    fn subscription_request_omits_empty_channels() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Channel::Trades, ["AAPL"]);
        registry.subscribe(Channel::Quotes, ["aapl"]);
        let delta = SubscriptionDelta::subscribe_all(registry.snapshot());

        let value = serde_json::to_value(SubscriptionRequest::from(&delta)).unwrap();
        assert_eq!(
            value,
            json!({"action": "subscribe", "trades": ["AAPL"], "quotes": ["AAPL"]})
        );
    }

    #[test]
    fn unsubscribe_request_uses_camel_case_daily_bars() {
        let mut registry = SubscriptionRegistry::new();
        let delta = registry.unsubscribe(Channel::DailyBars, ["spy"]);

        let value = serde_json::to_value(SubscriptionRequest::from(&delta)).unwrap();
        assert_eq!(value, json!({"action": "unsubscribe", "dailyBars": ["SPY"]}));
    }

    #[test]
    fn listen_request_shape() {
        let value = serde_json::to_value(ListenRequest::trade_updates()).unwrap();
        assert_eq!(
            value,
            json!({"action": "listen", "data": {"streams": ["trade_updates"]}})
        );
    }

    #[test]
    fn authorization_reply() {
        let msg: AuthorizationMessage = serde_json::from_value(json!({
            "stream": "authorization",
            "data": {"status": "authorized", "action": "authenticate"}
        }))
        .unwrap();
        assert!(msg.is_authorized());

        let msg: AuthorizationMessage = serde_json::from_value(json!({
            "stream": "authorization",
            "data": {"status": "unauthorized"}
        }))
        .unwrap();
        assert!(!msg.is_authorized());
    }

    #[test]
    fn subscription_ack_to_set() {
        let ack: SubscriptionAck = serde_json::from_value(json!({
            "T": "subscription",
            "trades": ["AAPL"],
            "dailyBars": ["SPY"]
        }))
        .unwrap();
        let set = ack.to_set();
        assert!(set.contains(Channel::Trades, "AAPL"));
        assert!(set.contains(Channel::DailyBars, "SPY"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn error_message_classification() {
        let parse = |value| serde_json::from_value::<ErrorMessage>(value).unwrap();

        let limit = parse(json!({"T": "error", "code": 405, "msg": "symbol limit exceeded"}));
        assert!(limit.answers_request());
        assert_eq!(limit.msg, "symbol limit exceeded");

        assert!(parse(json!({"T": "error", "code": 400, "msg": "invalid syntax"})).answers_request());
        assert!(parse(json!({"T": "error", "msg": "no code"})).answers_request());
        assert!(!parse(json!({"T": "error", "code": 407, "msg": "slow client"})).answers_request());
        assert!(!parse(json!({"T": "error", "code": 402, "msg": "auth failed"})).answers_request());
    }
}
