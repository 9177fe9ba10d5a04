//! Market Data Streaming Types
//!
//! Canonical records handed to consumers: order book snapshots and trade
//! prints. These types are exchange-independent; the Binance wire payloads
//! are converted into them by the message router.
//!
//! # Normalization
//!
//! Order book levels arrive as `["price", "volume"]` string pairs. Once
//! parsed they carry a `processed` marker, and normalizing an already
//! processed level returns it unchanged. This makes re-normalizing a cached
//! book a no-op.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::instrument::Instrument;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while converting exchange payloads into canonical records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// A numeric field could not be parsed.
    #[error("invalid {field}: {value:?}")]
    InvalidNumber {
        /// Name of the field being parsed.
        field: &'static str,
        /// Raw value as received.
        value: String,
    },
}

/// Parse a decimal string field into an `f64`.
///
/// # Errors
///
/// Returns `NormalizeError::InvalidNumber` if the string is not a number.
pub fn parse_number(field: &'static str, value: &str) -> Result<f64, NormalizeError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| NormalizeError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

// =============================================================================
// Order Book
// =============================================================================

/// A single normalized price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: f64,
    /// Resting volume at this price.
    pub volume: f64,
    /// Marker set once the level has been normalized.
    #[serde(default)]
    pub processed: bool,
}

impl PriceLevel {
    /// Create a processed level.
    #[must_use]
    pub const fn new(price: f64, volume: f64) -> Self {
        Self {
            price,
            volume,
            processed: true,
        }
    }
}

/// A book level as it may appear in a payload or in cached state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BookEntry {
    /// Exchange-native `[price, volume]` string pair.
    Raw([String; 2]),
    /// An already normalized level.
    Level(PriceLevel),
}

impl BookEntry {
    /// Normalize this entry into a processed price level.
    ///
    /// Entries carrying the processed marker pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if a raw pair does not contain valid numbers.
    pub fn normalize(self) -> Result<PriceLevel, NormalizeError> {
        match self {
            Self::Level(level) if level.processed => Ok(level),
            Self::Level(level) => Ok(PriceLevel::new(level.price, level.volume)),
            Self::Raw([price, volume]) => Ok(PriceLevel::new(
                parse_number("price", &price)?,
                parse_number("volume", &volume)?,
            )),
        }
    }
}

impl From<PriceLevel> for BookEntry {
    fn from(level: PriceLevel) -> Self {
        Self::Level(level)
    }
}

/// Normalize a side of the book, preserving level order.
///
/// # Errors
///
/// Returns the first normalization error encountered.
pub fn normalize_levels(
    entries: impl IntoIterator<Item = BookEntry>,
) -> Result<Vec<PriceLevel>, NormalizeError> {
    entries.into_iter().map(BookEntry::normalize).collect()
}

/// Canonical order book snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Bid levels, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first.
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Build a book from payload entries.
    ///
    /// # Errors
    ///
    /// Returns an error if any level fails to normalize.
    pub fn from_entries(
        bids: impl IntoIterator<Item = BookEntry>,
        asks: impl IntoIterator<Item = BookEntry>,
    ) -> Result<Self, NormalizeError> {
        Ok(Self {
            bids: normalize_levels(bids)?,
            asks: normalize_levels(asks)?,
        })
    }

    /// Re-normalize this book. Always returns an identical book.
    ///
    /// # Errors
    ///
    /// Never fails for a book built by [`OrderBook::from_entries`].
    pub fn renormalize(&self) -> Result<Self, NormalizeError> {
        Self::from_entries(
            self.bids.iter().copied().map(BookEntry::from),
            self.asks.iter().copied().map(BookEntry::from),
        )
    }

    /// Highest bid, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    /// Lowest ask, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }
}

/// Order book delivered to consumers of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookUpdate {
    /// Resolved instrument.
    pub instrument: Instrument,
    /// Wire channel the book arrived on.
    pub channel: String,
    /// Exchange sequence of the snapshot, when present.
    pub last_update_id: Option<u64>,
    /// Normalized book.
    pub book: OrderBook,
}

// =============================================================================
// Trade Prints
// =============================================================================

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buyer was the taker.
    Buy,
    /// Seller was the taker.
    Sell,
}

impl Side {
    /// Derive the aggressor side from the exchange's "is buyer maker" flag.
    ///
    /// A resting buyer means the seller crossed the spread.
    #[must_use]
    pub const fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker { Self::Sell } else { Self::Buy }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Canonical trade print.
///
/// Prints are stream-only: the client never retains them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePrint {
    /// Exchange trade (or aggregate trade) id.
    pub order_id: u64,
    /// Aggressor side.
    pub side: Side,
    /// Event time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Canonical instrument symbol.
    pub symbol: String,
    /// Execution price.
    pub price: f64,
    /// Executed volume.
    pub volume: f64,
}

impl TradePrint {
    /// Event time as a UTC timestamp.
    #[must_use]
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(price: &str, volume: &str) -> BookEntry {
        BookEntry::Raw([price.to_string(), volume.to_string()])
    }

    #[test]
    fn raw_pair_normalizes_to_processed_level() {
        let level = raw("100.5", "2.0").normalize().unwrap();
        assert_eq!(level, PriceLevel {
            price: 100.5,
            volume: 2.0,
            processed: true,
        });
    }

    #[test]
    fn processed_level_passes_through_unchanged() {
        let level = PriceLevel::new(42.25, 0.125);
        assert_eq!(BookEntry::Level(level).normalize().unwrap(), level);
    }

    #[test]
    fn unmarked_level_gets_marked() {
        let level = PriceLevel {
            price: 1.0,
            volume: 3.0,
            processed: false,
        };
        let normalized = BookEntry::Level(level).normalize().unwrap();
        assert!(normalized.processed);
        assert_eq!(normalized.price, 1.0);
        assert_eq!(normalized.volume, 3.0);
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = raw("abc", "1").normalize().unwrap_err();
        assert_eq!(err, NormalizeError::InvalidNumber {
            field: "price",
            value: "abc".to_string(),
        });
    }

    #[test]
    fn book_entries_deserialize_from_both_shapes() {
        let entries: Vec<BookEntry> = serde_json::from_str(
            r#"[["100.5","2.0"],{"price":99.0,"volume":1.5,"processed":true}]"#,
        )
        .unwrap();

        assert_eq!(entries[0], raw("100.5", "2.0"));
        assert_eq!(entries[1], BookEntry::Level(PriceLevel::new(99.0, 1.5)));
    }

    #[test]
    fn renormalizing_cached_book_is_identity() {
        let book = OrderBook::from_entries(
            vec![raw("100.5", "2.0"), raw("100.4", "1.0")],
            vec![raw("100.6", "3.0")],
        )
        .unwrap();

        assert_eq!(book.renormalize().unwrap(), book);
    }

    #[test]
    fn serialized_book_normalizes_back_to_itself() {
        let book = OrderBook::from_entries(vec![raw("10", "1")], vec![raw("11", "2")]).unwrap();
        let json = serde_json::to_string(&book.bids).unwrap();
        let entries: Vec<BookEntry> = serde_json::from_str(&json).unwrap();

        assert_eq!(normalize_levels(entries).unwrap(), book.bids);
    }

    #[test]
    fn book_preserves_level_order() {
        let book = OrderBook::from_entries(
            vec![raw("3", "1"), raw("2", "1"), raw("1", "1")],
            vec![],
        )
        .unwrap();

        let prices: Vec<f64> = book.bids.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![3.0, 2.0, 1.0]);
        assert_eq!(book.best_bid().map(|l| l.price), Some(3.0));
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn side_from_buyer_maker_flag() {
        assert_eq!(Side::from_buyer_maker(true), Side::Sell);
        assert_eq!(Side::from_buyer_maker(false), Side::Buy);
        assert_eq!(Side::Sell.as_str(), "sell");
    }

    #[test]
    fn trade_print_serializes_camel_case() {
        let print = TradePrint {
            order_id: 555,
            side: Side::Sell,
            timestamp: 1_690_000_000_000,
            symbol: "BTCUSDT".to_string(),
            price: 30000.1,
            volume: 0.01,
        };

        let json = serde_json::to_value(&print).unwrap();
        assert_eq!(json["orderId"], 555);
        assert_eq!(json["side"], "sell");
        assert_eq!(json["timestamp"], 1_690_000_000_000_i64);
    }

    #[test]
    fn trade_print_timestamp_utc() {
        let print = TradePrint {
            order_id: 1,
            side: Side::Buy,
            timestamp: 1_690_000_000_000,
            symbol: "BTCUSDT".to_string(),
            price: 1.0,
            volume: 1.0,
        };

        let ts = print.timestamp_utc().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_690_000_000_000);
    }
}
