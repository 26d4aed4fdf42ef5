//! Stream Codec
//!
//! JSON framing for all Alpaca streams. Inbound frames are either a JSON
//! array of message objects (market data) or a single object (trade updates,
//! some control messages); both normalize to a list of envelopes.
//!
//! Elements are decoded one by one. An element without a kind discriminator
//! is skipped and reported; its siblings still decode.

use serde::Serialize;
use serde_json::Value;

use crate::domain::streaming::MessageEnvelope;
use crate::error::ProtocolError;

/// Envelopes decoded from one frame.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Decoded messages, in frame order.
    pub envelopes: Vec<MessageEnvelope>,
    /// Elements that were skipped, with the reason.
    pub skipped: Vec<ProtocolError>,
}

impl DecodedFrame {
    fn push(&mut self, element: Value) {
        match MessageEnvelope::from_value(element) {
            Ok(envelope) => self.envelopes.push(envelope),
            Err(e) => self.skipped.push(e),
        }
    }
}

/// JSON codec for market data and trade update streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into envelopes.
    ///
    /// A bare object becomes a one-element list. An empty array decodes to
    /// an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error only if the frame is not JSON or is neither an array
    /// nor an object. Bad elements land in [`DecodedFrame::skipped`].
    pub fn decode(&self, frame: &str) -> Result<DecodedFrame, ProtocolError> {
        let value: Value = serde_json::from_str(frame.trim())?;
        let mut decoded = DecodedFrame::default();

        match value {
            Value::Array(items) => {
                for item in items {
                    decoded.push(item);
                }
                Ok(decoded)
            }
            object @ Value::Object(_) => {
                decoded.push(object);
                Ok(decoded)
            }
            Value::Null => Err(ProtocolError::UnexpectedShape("null")),
            Value::Bool(_) => Err(ProtocolError::UnexpectedShape("boolean")),
            Value::Number(_) => Err(ProtocolError::UnexpectedShape("number")),
            Value::String(_) => Err(ProtocolError::UnexpectedShape("string")),
        }
    }

    /// Encode an outbound request as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(message)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::streaming::MessageKind;
    use crate::infrastructure::alpaca::messages::ListenRequest;

    #[test]
    fn decodes_array_batch_in_order() {
        let frame = r#"[{"T":"t","S":"AAPL","p":1.0},{"T":"q","S":"MSFT"},{"T":"b","S":"SPY"}]"#;
        let envelopes = JsonCodec::new().decode(frame).unwrap().envelopes;

        let kinds: Vec<_> = envelopes.iter().map(|e| e.kind().clone()).collect();
        assert_eq!(
            kinds,
            [MessageKind::Trade, MessageKind::Quote, MessageKind::Bar]
        );
        assert_eq!(envelopes[1].symbol(), Some("MSFT"));
    }

    #[test]
    fn bare_object_equals_one_element_array() {
        let codec = JsonCodec::new();
        let single = codec.decode(r#"{"T":"t","S":"AAPL"}"#).unwrap().envelopes;
        let batch = codec.decode(r#"[{"T":"t","S":"AAPL"}]"#).unwrap().envelopes;
        assert_eq!(single, batch);
    }

    #[test]
    fn trade_update_frame_uses_stream_field() {
        let frame = r#"{"stream":"trade_updates","data":{"event":"fill","order":{"symbol":"AAPL"}}}"#;
        let envelopes = JsonCodec::new().decode(frame).unwrap().envelopes;
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].kind(), &MessageKind::TradeUpdate);
        assert_eq!(
            envelopes[0].field("data").and_then(|d| d.get("event")),
            Some(&json!("fill"))
        );
    }

    #[test]
    fn empty_array_decodes_to_nothing() {
        let decoded = JsonCodec::new().decode("[]").unwrap();
        assert!(decoded.envelopes.is_empty());
        assert!(decoded.skipped.is_empty());
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        let codec = JsonCodec::new();
        assert!(matches!(codec.decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            codec.decode("42"),
            Err(ProtocolError::UnexpectedShape("number"))
        ));
    }

    #[test]
    fn untagged_element_is_skipped_not_the_batch() {
        let decoded = JsonCodec::new()
            .decode(r#"[{"T":"t","S":"AAPL"},{"S":"MSFT"},7,{"T":"q","S":"SPY"}]"#)
            .unwrap();

        let symbols: Vec<_> = decoded.envelopes.iter().map(|e| e.symbol()).collect();
        assert_eq!(symbols, [Some("AAPL"), Some("SPY")]);
        assert_eq!(decoded.skipped.len(), 2);
        assert!(matches!(decoded.skipped[0], ProtocolError::MissingKind(_)));
        assert!(matches!(decoded.skipped[1], ProtocolError::NotAnObject(_)));
    }

    #[test]
    fn untagged_bare_object_decodes_to_nothing() {
        let decoded = JsonCodec::new().decode(r#"{"note":"no tag"}"#).unwrap();
        assert!(decoded.envelopes.is_empty());
        assert_eq!(decoded.skipped.len(), 1);
    }

    #[test]
    fn encodes_requests() {
        let frame = JsonCodec::new().encode(&ListenRequest::trade_updates()).unwrap();
        assert_eq!(
            frame,
            r#"{"action":"listen","data":{"streams":["trade_updates"]}}"#
        );
    }
}
