//! Subscription Tracking
//!
//! Domain types for the desired subscription state of one stream session.
//!
//! # Design
//!
//! The registry is the single source of truth for what the session should
//! be subscribed to. It is updated optimistically when a request is made,
//! before the server acknowledges it, so a reconnect that races a pending
//! request still replays the intended state.
//!
//! Symbols are stored uppercase in ordered sets, which keeps replayed
//! messages deterministic.

use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// Channel
// =============================================================================

/// Market data channel a symbol can be subscribed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Trades.
    Trades,
    /// Quotes.
    Quotes,
    /// Minute bars.
    Bars,
    /// Daily bars.
    DailyBars,
    /// Trading statuses (halts, resumes).
    Statuses,
    /// Limit Up/Limit Down bands.
    Lulds,
}

impl Channel {
    /// All channels in wire order.
    pub const ALL: [Self; 6] = [
        Self::Trades,
        Self::Quotes,
        Self::Bars,
        Self::DailyBars,
        Self::Statuses,
        Self::Lulds,
    ];

    /// Key used for this channel in subscribe/unsubscribe messages.
    #[must_use]
    pub const fn wire_key(self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Quotes => "quotes",
            Self::Bars => "bars",
            Self::DailyBars => "dailyBars",
            Self::Statuses => "statuses",
            Self::Lulds => "lulds",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_key())
    }
}

/// Normalize a symbol: trim whitespace and uppercase. Empty input yields `None`.
#[must_use]
pub fn normalize_symbol(symbol: &str) -> Option<String> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

// =============================================================================
// Subscription Set
// =============================================================================

/// Symbols per channel.
///
/// Used both as the registry's desired state and as a caller's selection for
/// a single subscribe or unsubscribe request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    trades: BTreeSet<String>,
    quotes: BTreeSet<String>,
    bars: BTreeSet<String>,
    daily_bars: BTreeSet<String>,
    statuses: BTreeSet<String>,
    lulds: BTreeSet<String>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols on a channel, builder style.
    #[must_use]
    pub fn with<I, S>(mut self, channel: Channel, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert_all(channel, symbols);
        self
    }

    /// Add trade symbols.
    #[must_use]
    pub fn with_trades<I, S>(self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with(Channel::Trades, symbols)
    }

    /// Add quote symbols.
    #[must_use]
    pub fn with_quotes<I, S>(self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with(Channel::Quotes, symbols)
    }

    /// Add minute bar symbols.
    #[must_use]
    pub fn with_bars<I, S>(self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with(Channel::Bars, symbols)
    }

    /// Symbols on a channel.
    #[must_use]
    pub const fn symbols(&self, channel: Channel) -> &BTreeSet<String> {
        match channel {
            Channel::Trades => &self.trades,
            Channel::Quotes => &self.quotes,
            Channel::Bars => &self.bars,
            Channel::DailyBars => &self.daily_bars,
            Channel::Statuses => &self.statuses,
            Channel::Lulds => &self.lulds,
        }
    }

    const fn symbols_mut(&mut self, channel: Channel) -> &mut BTreeSet<String> {
        match channel {
            Channel::Trades => &mut self.trades,
            Channel::Quotes => &mut self.quotes,
            Channel::Bars => &mut self.bars,
            Channel::DailyBars => &mut self.daily_bars,
            Channel::Statuses => &mut self.statuses,
            Channel::Lulds => &mut self.lulds,
        }
    }

    /// Insert normalized symbols. Returns how many were new.
    pub fn insert_all<I, S>(&mut self, channel: Channel, symbols: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = self.symbols_mut(channel);
        symbols
            .into_iter()
            .filter_map(|s| normalize_symbol(s.as_ref()))
            .filter(|s| set.insert(s.clone()))
            .count()
    }

    /// Remove normalized symbols. Returns how many were present.
    pub fn remove_all<I, S>(&mut self, channel: Channel, symbols: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = self.symbols_mut(channel);
        symbols
            .into_iter()
            .filter_map(|s| normalize_symbol(s.as_ref()))
            .filter(|s| set.remove(s))
            .count()
    }

    /// Whether `symbol` is present on `channel`.
    #[must_use]
    pub fn contains(&self, channel: Channel, symbol: &str) -> bool {
        normalize_symbol(symbol).is_some_and(|s| self.symbols(channel).contains(&s))
    }

    /// Iterate non-empty channels in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, &BTreeSet<String>)> {
        Channel::ALL
            .into_iter()
            .map(|channel| (channel, self.symbols(channel)))
            .filter(|(_, symbols)| !symbols.is_empty())
    }

    /// Whether every channel is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Channel::ALL
            .iter()
            .all(|channel| self.symbols(*channel).is_empty())
    }

    /// Total symbol count across channels.
    #[must_use]
    pub fn len(&self) -> usize {
        Channel::ALL
            .iter()
            .map(|channel| self.symbols(*channel).len())
            .sum()
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Direction of a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionAction {
    /// Start streaming.
    Subscribe,
    /// Stop streaming.
    Unsubscribe,
}

impl SubscriptionAction {
    /// Value of the `"action"` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A request the session should send: an action plus the symbols it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDelta {
    /// Subscribe or unsubscribe.
    pub action: SubscriptionAction,
    /// Symbols named by the request, per channel.
    pub symbols: SubscriptionSet,
}

impl SubscriptionDelta {
    /// A subscribe request naming everything in `snapshot`.
    #[must_use]
    pub const fn subscribe_all(snapshot: SubscriptionSet) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            symbols: snapshot,
        }
    }

    /// Whether the request names no symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Versioned desired-subscription state of one session.
///
/// The version increases on every call that changes the state, which lets
/// observers tell whether a snapshot is stale.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    desired: SubscriptionSet,
    version: u64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `symbols` into `channel` and return the subscribe request.
    pub fn subscribe<I, S>(&mut self, channel: Channel, symbols: I) -> SubscriptionDelta
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selection = SubscriptionSet::new().with(channel, symbols);
        self.apply(SubscriptionAction::Subscribe, &selection)
    }

    /// Remove `symbols` from `channel` and return the unsubscribe request.
    ///
    /// Other channels and symbols are untouched.
    pub fn unsubscribe<I, S>(&mut self, channel: Channel, symbols: I) -> SubscriptionDelta
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selection = SubscriptionSet::new().with(channel, symbols);
        self.apply(SubscriptionAction::Unsubscribe, &selection)
    }

    /// Apply a multi-channel selection and return the combined request.
    ///
    /// The request names every selected symbol, including ones already in
    /// the desired state, so the server sees exactly what the caller asked for.
    pub fn apply(
        &mut self,
        action: SubscriptionAction,
        selection: &SubscriptionSet,
    ) -> SubscriptionDelta {
        let changed: usize = selection
            .iter()
            .map(|(channel, symbols)| match action {
                SubscriptionAction::Subscribe => self.desired.insert_all(channel, symbols),
                SubscriptionAction::Unsubscribe => self.desired.remove_all(channel, symbols),
            })
            .sum();

        if changed > 0 {
            self.version += 1;
        }

        SubscriptionDelta {
            action,
            symbols: selection.clone(),
        }
    }

    /// Copy of the full desired state.
    #[must_use]
    pub fn snapshot(&self) -> SubscriptionSet {
        self.desired.clone()
    }

    /// Borrow the desired state.
    #[must_use]
    pub const fn desired(&self) -> &SubscriptionSet {
        &self.desired
    }

    /// Number of effective changes applied so far.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Whether nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
