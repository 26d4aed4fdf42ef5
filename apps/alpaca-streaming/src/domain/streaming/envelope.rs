//! Message envelopes.
//!
//! Every inbound element is kept as its raw JSON object plus the kind
//! discriminator read from `"T"` (market data) or `"stream"` (trade updates).
//! Handlers deserialize the payload into whatever shape they need.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProtocolError;

/// Discriminator of a message, or of a lifecycle event emitted by the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Trade (`t`).
    Trade,
    /// Quote (`q`).
    Quote,
    /// Minute bar (`b`).
    Bar,
    /// Daily bar (`d`).
    DailyBar,
    /// Trading status (`s`).
    Status,
    /// Limit Up/Limit Down band (`l`).
    Luld,
    /// Trade cancel or error (`x`).
    Cancel,
    /// Trade correction (`c`).
    Correction,
    /// Order update from the trading stream (`trade_updates`).
    TradeUpdate,
    /// Subscription acknowledgement (`subscription`).
    Subscription,
    /// Feed-reported error (`error`), also emitted for session errors.
    Error,
    /// Control success message (`success`).
    Success,
    /// Trading stream auth reply (`authorization`).
    Authorization,
    /// Trading stream listen acknowledgement (`listening`).
    Listening,
    /// Lifecycle: the session is connected and authenticated.
    Connected,
    /// Lifecycle: the session has shut down.
    Disconnected,
    /// Any other wire tag, such as updated bars (`u`) or crypto order books (`o`).
    Other(String),
}

impl MessageKind {
    /// Kinds that carry market data.
    pub const MARKET_DATA: [Self; 8] = [
        Self::Trade,
        Self::Quote,
        Self::Bar,
        Self::DailyBar,
        Self::Status,
        Self::Luld,
        Self::Cancel,
        Self::Correction,
    ];

    /// Classify a wire tag.
    ///
    /// Lifecycle kinds are never produced here, so a frame tagged
    /// `"connected"` cannot reach connection handlers.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "t" => Self::Trade,
            "q" => Self::Quote,
            "b" => Self::Bar,
            "d" => Self::DailyBar,
            "s" => Self::Status,
            "l" => Self::Luld,
            "x" => Self::Cancel,
            "c" => Self::Correction,
            "trade_updates" => Self::TradeUpdate,
            "subscription" => Self::Subscription,
            "error" => Self::Error,
            "success" => Self::Success,
            "authorization" => Self::Authorization,
            "listening" => Self::Listening,
            other => Self::Other(other.to_string()),
        }
    }

    /// Tag string for this kind.
    #[must_use]
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Trade => "t",
            Self::Quote => "q",
            Self::Bar => "b",
            Self::DailyBar => "d",
            Self::Status => "s",
            Self::Luld => "l",
            Self::Cancel => "x",
            Self::Correction => "c",
            Self::TradeUpdate => "trade_updates",
            Self::Subscription => "subscription",
            Self::Error => "error",
            Self::Success => "success",
            Self::Authorization => "authorization",
            Self::Listening => "listening",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Other(tag) => tag,
        }
    }

    /// Whether this kind is a session lifecycle event rather than a wire kind.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected)
    }

    /// Whether this kind answers a subscribe, unsubscribe, or listen request.
    #[must_use]
    pub const fn is_acknowledgement(&self) -> bool {
        matches!(self, Self::Subscription | Self::Listening | Self::Error)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        Self::from_tag(tag)
    }
}

/// A decoded message: its kind plus the untyped payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    kind: MessageKind,
    payload: Value,
}

impl MessageEnvelope {
    /// Wrap a decoded JSON element.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::NotAnObject` for non-object elements and
    /// `ProtocolError::MissingKind` when neither `"T"` nor `"stream"` is a string.
    pub fn from_value(payload: Value) -> Result<Self, ProtocolError> {
        if !payload.is_object() {
            return Err(ProtocolError::NotAnObject(json_type_name(&payload)));
        }

        let tag = payload
            .get("T")
            .and_then(Value::as_str)
            .or_else(|| payload.get("stream").and_then(Value::as_str))
            .ok_or_else(|| ProtocolError::MissingKind(truncate(&payload.to_string())))?;

        Ok(Self {
            kind: MessageKind::from_tag(tag),
            payload,
        })
    }

    /// Build a lifecycle event envelope emitted by the session itself.
    #[must_use]
    pub const fn lifecycle(kind: MessageKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Message kind.
    #[must_use]
    pub const fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Raw payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Consume the envelope, returning the raw payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Look up a top-level payload field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Symbol (`"S"`) of a market data message.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.field("S").and_then(Value::as_str)
    }

    /// Human-readable message (`"msg"`) of control and error messages.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.field("msg").and_then(Value::as_str)
    }

    /// Numeric code (`"code"`) of an error message.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        self.field("code").and_then(Value::as_i64)
    }

    /// Deserialize the payload into a typed message.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the payload does not match `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(80).collect()
}
