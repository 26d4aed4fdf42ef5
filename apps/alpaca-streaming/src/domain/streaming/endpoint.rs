//! Stream endpoints.
//!
//! Market data streams always use production URLs. Only trade updates have a
//! separate paper endpoint.

use std::fmt;

/// One of Alpaca's real-time push feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamEndpoint {
    /// IEX equity feed (free tier).
    #[default]
    Iex,
    /// SIP equity feed (all US exchanges).
    Sip,
    /// Crypto feed (US venues).
    Crypto,
    /// Trade updates for the paper trading account.
    PaperTrading,
    /// Trade updates for the live trading account.
    LiveTrading,
}

impl StreamEndpoint {
    /// All endpoints, market data first.
    pub const ALL: [Self; 5] = [
        Self::Iex,
        Self::Sip,
        Self::Crypto,
        Self::PaperTrading,
        Self::LiveTrading,
    ];

    /// WebSocket URL for this endpoint.
    #[must_use]
    pub const fn url(self) -> &'static str {
        match self {
            Self::Iex => "wss://stream.data.alpaca.markets/v2/iex",
            Self::Sip => "wss://stream.data.alpaca.markets/v2/sip",
            Self::Crypto => "wss://stream.data.alpaca.markets/v1beta3/crypto/us",
            Self::PaperTrading => "wss://paper-api.alpaca.markets/stream",
            Self::LiveTrading => "wss://api.alpaca.markets/stream",
        }
    }

    /// Short name used in logs, metrics labels, and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Iex => "iex",
            Self::Sip => "sip",
            Self::Crypto => "crypto",
            Self::PaperTrading => "paper",
            Self::LiveTrading => "live",
        }
    }

    /// Parse an endpoint from its short name, ignoring case.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "iex" => Some(Self::Iex),
            "sip" => Some(Self::Sip),
            "crypto" => Some(Self::Crypto),
            "paper" | "paper_trading" => Some(Self::PaperTrading),
            "live" | "live_trading" => Some(Self::LiveTrading),
            _ => None,
        }
    }

    /// Trade-update endpoint for the given account type.
    #[must_use]
    pub const fn trading(paper: bool) -> Self {
        if paper {
            Self::PaperTrading
        } else {
            Self::LiveTrading
        }
    }

    /// Whether this endpoint carries order updates rather than market data.
    #[must_use]
    pub const fn is_trading(self) -> bool {
        matches!(self, Self::PaperTrading | Self::LiveTrading)
    }

    /// Whether the server greets a new connection before authentication.
    ///
    /// Market data feeds open with `[{"T":"success","msg":"connected"}]`.
    /// The trade-update stream waits silently for the auth request.
    #[must_use]
    pub const fn sends_welcome(self) -> bool {
        !self.is_trading()
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_fixed_per_endpoint() {
        assert_eq!(
            StreamEndpoint::Iex.url(),
            "wss://stream.data.alpaca.markets/v2/iex"
        );
        assert_eq!(
            StreamEndpoint::Sip.url(),
            "wss://stream.data.alpaca.markets/v2/sip"
        );
        assert_eq!(
            StreamEndpoint::Crypto.url(),
            "wss://stream.data.alpaca.markets/v1beta3/crypto/us"
        );
        assert_eq!(
            StreamEndpoint::PaperTrading.url(),
            "wss://paper-api.alpaca.markets/stream"
        );
        assert_eq!(
            StreamEndpoint::LiveTrading.url(),
            "wss://api.alpaca.markets/stream"
        );
    }

    #[test]
    fn parsing_round_trips_short_names() {
        for endpoint in StreamEndpoint::ALL {
            assert_eq!(
                StreamEndpoint::from_str_case_insensitive(endpoint.as_str()),
                Some(endpoint)
            );
        }
        assert_eq!(
            StreamEndpoint::from_str_case_insensitive(" SIP "),
            Some(StreamEndpoint::Sip)
        );
        assert_eq!(StreamEndpoint::from_str_case_insensitive("opra"), None);
    }

    #[test]
    fn only_market_data_sends_welcome() {
        assert!(StreamEndpoint::Iex.sends_welcome());
        assert!(StreamEndpoint::Crypto.sends_welcome());
        assert!(!StreamEndpoint::PaperTrading.sends_welcome());
        assert!(StreamEndpoint::trading(false).is_trading());
        assert_eq!(StreamEndpoint::trading(true), StreamEndpoint::PaperTrading);
    }
}
