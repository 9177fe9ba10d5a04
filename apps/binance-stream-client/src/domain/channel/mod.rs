//! Channel Keys
//!
//! A channel key identifies one upstream data stream: an instrument symbol,
//! a data kind and the kind-specific parameters. The codec maps keys to the
//! exchange's stream names and classifies incoming stream names.
//!
//! # Stream Names
//!
//! | Kind | Parameters | Stream name |
//! |------|------------|-------------|
//! | Order book | interval 100 ms | `btcusdt@depth20@100ms` |
//! | Trades | aggregated | `btcusdt@aggTrade` |
//! | Trades | raw | `btcusdt@trade` |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Order book depth levels requested from the exchange.
pub const ORDERBOOK_DEPTH: u32 = 20;

/// Update intervals the exchange accepts for partial book depth streams.
pub const ALLOWED_ORDERBOOK_INTERVALS_MS: &[u32] = &[100, 1000];

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building channel parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The exchange does not publish book snapshots at this interval.
    #[error("unsupported order book update interval {0}ms (expected one of {ALLOWED_ORDERBOOK_INTERVALS_MS:?})")]
    UnsupportedInterval(u32),
}

// =============================================================================
// Types
// =============================================================================

/// Data kind carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Partial order book snapshots.
    Orderbook,
    /// Trade prints (raw or aggregated).
    Trades,
}

impl DataKind {
    /// All data kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Orderbook, Self::Trades]
    }

    /// Lowercase name, used for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Orderbook => "orderbook",
            Self::Trades => "trades",
        }
    }

    /// Whether the client keeps the latest record for this kind.
    ///
    /// Order books are snapshots and are retained; trade prints are
    /// stream-only.
    #[must_use]
    pub const fn retains_value(&self) -> bool {
        matches!(self, Self::Orderbook)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific channel parameters, fixed for the life of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelParams {
    /// Order book snapshots at the given update interval.
    Orderbook {
        /// Update interval in milliseconds.
        interval_ms: u32,
    },
    /// Trade prints.
    Trades {
        /// Aggregated trades (`@aggTrade`) instead of raw trades (`@trade`).
        aggregated: bool,
    },
}

impl ChannelParams {
    /// Order book parameters with a validated update interval.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::UnsupportedInterval` unless the interval is
    /// 100 or 1000 ms.
    pub fn orderbook(interval_ms: u32) -> Result<Self, ChannelError> {
        if ALLOWED_ORDERBOOK_INTERVALS_MS.contains(&interval_ms) {
            Ok(Self::Orderbook { interval_ms })
        } else {
            Err(ChannelError::UnsupportedInterval(interval_ms))
        }
    }

    /// The data kind these parameters belong to.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::Orderbook { .. } => DataKind::Orderbook,
            Self::Trades { .. } => DataKind::Trades,
        }
    }
}

/// Logical identifier of an upstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    /// Upper-case instrument symbol.
    pub symbol: String,
    /// Kind parameters.
    pub params: ChannelParams,
}

impl ChannelKey {
    /// Create a key, normalizing the symbol to upper case.
    #[must_use]
    pub fn new(symbol: &str, params: ChannelParams) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            params,
        }
    }

    /// Order book key.
    #[must_use]
    pub fn orderbook(symbol: &str, interval_ms: u32) -> Self {
        Self::new(symbol, ChannelParams::Orderbook { interval_ms })
    }

    /// Trades key.
    #[must_use]
    pub fn trades(symbol: &str, aggregated: bool) -> Self {
        Self::new(symbol, ChannelParams::Trades { aggregated })
    }

    /// Data kind of this key.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        self.params.kind()
    }

    /// Wire stream name.
    #[must_use]
    pub fn channel_name(&self) -> String {
        ChannelKeyCodec::encode(self)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.channel_name())
    }
}

/// Result of classifying a stream name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedChannel {
    /// Upper-cased symbol prefix of the stream name.
    pub symbol: String,
    /// Data kind.
    pub kind: DataKind,
}

// =============================================================================
// Codec
// =============================================================================

/// Stateless mapping between channel keys and stream names.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelKeyCodec;

impl ChannelKeyCodec {
    /// Encode a key as a stream name.
    #[must_use]
    pub fn encode(key: &ChannelKey) -> String {
        let symbol = key.symbol.to_lowercase();
        match key.params {
            ChannelParams::Orderbook { interval_ms } => {
                format!("{symbol}@depth{ORDERBOOK_DEPTH}@{interval_ms}ms")
            }
            ChannelParams::Trades { aggregated: true } => format!("{symbol}@aggTrade"),
            ChannelParams::Trades { aggregated: false } => format!("{symbol}@trade"),
        }
    }

    /// Classify a stream name.
    ///
    /// Returns `None` for stream names this client does not handle.
    #[must_use]
    pub fn decode(channel: &str) -> Option<DecodedChannel> {
        let (prefix, suffix) = channel.split_once('@')?;
        if prefix.is_empty() {
            return None;
        }

        let suffix = suffix.to_ascii_lowercase();
        let kind = if suffix.starts_with("depth20") {
            DataKind::Orderbook
        } else if suffix == "trade" || suffix == "aggtrade" {
            DataKind::Trades
        } else {
            return None;
        };

        Some(DecodedChannel {
            symbol: prefix.to_uppercase(),
            kind,
        })
    }
}
