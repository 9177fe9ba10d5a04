//! Broadcast Channel Adapters
//!
//! Per-channel sinks built on tokio broadcast channels for fan-out to
//! every consumer holding a reference to the channel.
//!
//! # Architecture
//!
//! The `BroadcastHub` keeps one sink per active wire channel:
//! - Order book sinks also retain the latest book for the channel
//! - Trade sinks are stream-only and keep nothing
//!
//! Sinks are attached on every reference add and removed when the last
//! reference goes away. Delivery never blocks: slow receivers observe
//! `Lagged` and skip ahead.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::BroadcastSettings;
use crate::domain::streaming::{OrderBookUpdate, TradePrint};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for sink capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of each order book sink.
    pub orderbook_capacity: usize,
    /// Capacity of each trade sink.
    pub trades_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            orderbook_capacity: 1_024,
            trades_capacity: 4_096,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            orderbook_capacity: settings.orderbook_capacity,
            trades_capacity: settings.trades_capacity,
        }
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

#[derive(Debug)]
struct OrderbookSink {
    tx: broadcast::Sender<OrderBookUpdate>,
    latest: Option<OrderBookUpdate>,
}

/// Per-channel sinks for normalized records.
///
/// # Example
///
/// ```rust
/// use binance_stream_client::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
///
/// // Consumer side: attach to a channel
/// let _rx = hub.attach_trades("btcusdt@aggTrade");
/// assert_eq!(hub.trade_receiver_count("btcusdt@aggTrade"), 1);
///
/// // Last reference gone
/// hub.detach("btcusdt@aggTrade");
/// assert!(!hub.has_sink("btcusdt@aggTrade"));
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    config: BroadcastConfig,
    orderbooks: RwLock<HashMap<String, OrderbookSink>>,
    trades: RwLock<HashMap<String, broadcast::Sender<TradePrint>>>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            orderbooks: RwLock::new(HashMap::new()),
            trades: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Order Book Sinks
    // =========================================================================

    /// Get a receiver for an order book channel, creating the sink if needed.
    #[must_use]
    pub fn attach_orderbook(&self, channel: &str) -> broadcast::Receiver<OrderBookUpdate> {
        let mut sinks = self.orderbooks.write();
        sinks
            .entry(channel.to_string())
            .or_insert_with(|| OrderbookSink {
                tx: broadcast::channel(self.config.orderbook_capacity).0,
                latest: None,
            })
            .tx
            .subscribe()
    }

    /// Deliver a book to the channel's receivers and retain it as latest.
    ///
    /// Returns the number of receivers that got the book, or `None` if no
    /// sink is attached for the channel.
    #[must_use]
    pub fn publish_orderbook(&self, channel: &str, update: OrderBookUpdate) -> Option<usize> {
        let mut sinks = self.orderbooks.write();
        let sink = sinks.get_mut(channel)?;
        let delivered = sink.tx.send(update.clone()).unwrap_or(0);
        sink.latest = Some(update);
        Some(delivered)
    }

    /// The latest book received on a channel.
    #[must_use]
    pub fn latest_orderbook(&self, channel: &str) -> Option<OrderBookUpdate> {
        self.orderbooks
            .read()
            .get(channel)
            .and_then(|sink| sink.latest.clone())
    }

    /// Get the number of receivers on an order book channel.
    #[must_use]
    pub fn orderbook_receiver_count(&self, channel: &str) -> usize {
        self.orderbooks
            .read()
            .get(channel)
            .map_or(0, |sink| sink.tx.receiver_count())
    }

    // =========================================================================
    // Trade Sinks
    // =========================================================================

    /// Get a receiver for a trade channel, creating the sink if needed.
    #[must_use]
    pub fn attach_trades(&self, channel: &str) -> broadcast::Receiver<TradePrint> {
        let mut sinks = self.trades.write();
        sinks
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.config.trades_capacity).0)
            .subscribe()
    }

    /// Deliver a trade print to the channel's receivers.
    ///
    /// Returns the number of receivers that got the print, or `None` if no
    /// sink is attached for the channel.
    #[must_use]
    pub fn publish_trade(&self, channel: &str, print: TradePrint) -> Option<usize> {
        let sinks = self.trades.read();
        let tx = sinks.get(channel)?;
        Some(tx.send(print).unwrap_or(0))
    }

    /// Get the number of receivers on a trade channel.
    #[must_use]
    pub fn trade_receiver_count(&self, channel: &str) -> usize {
        self.trades
            .read()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Remove the sink for a channel. Outstanding receivers observe `Closed`.
    pub fn detach(&self, channel: &str) {
        self.orderbooks.write().remove(channel);
        self.trades.write().remove(channel);
    }

    /// Whether any sink is attached for the channel.
    #[must_use]
    pub fn has_sink(&self, channel: &str) -> bool {
        self.orderbooks.read().contains_key(channel) || self.trades.read().contains_key(channel)
    }

    /// Get statistics for all sinks.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        let orderbooks = self.orderbooks.read();
        let trades = self.trades.read();
        BroadcastStats {
            orderbook_sinks: orderbooks.len(),
            trade_sinks: trades.len(),
            orderbook_receivers: orderbooks.values().map(|s| s.tx.receiver_count()).sum(),
            trade_receivers: trades.values().map(broadcast::Sender::receiver_count).sum(),
        }
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastStats {
    /// Number of order book sinks.
    pub orderbook_sinks: usize,
    /// Number of trade sinks.
    pub trade_sinks: usize,
    /// Receivers across all order book sinks.
    pub orderbook_receivers: usize,
    /// Receivers across all trade sinks.
    pub trade_receivers: usize,
}

impl BroadcastStats {
    /// Get total number of receivers across all sinks.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.orderbook_receivers + self.trade_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::Instrument;
    use crate::domain::streaming::{OrderBook, PriceLevel, Side};

    const BOOK: &str = "btcusdt@depth20@100ms";
    const TRADES: &str = "btcusdt@aggTrade";

    fn make_update(price: f64) -> OrderBookUpdate {
        OrderBookUpdate {
            instrument: Instrument::binance("BTCUSDT"),
            channel: BOOK.to_string(),
            last_update_id: Some(1),
            book: OrderBook {
                bids: vec![PriceLevel::new(price, 1.0)],
                asks: vec![],
            },
        }
    }

    fn make_print() -> TradePrint {
        TradePrint {
            order_id: 1,
            side: Side::Buy,
            timestamp: 0,
            symbol: "BTCUSDT".to_string(),
            price: 1.0,
            volume: 1.0,
        }
    }

    #[test]
    fn broadcast_hub_creation() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.stats(), BroadcastStats::default());
    }

    #[test]
    fn receiver_count_increases() {
        let hub = BroadcastHub::with_defaults();

        let _rx1 = hub.attach_orderbook(BOOK);
        assert_eq!(hub.orderbook_receiver_count(BOOK), 1);

        let _rx2 = hub.attach_orderbook(BOOK);
        assert_eq!(hub.orderbook_receiver_count(BOOK), 2);
        assert_eq!(hub.stats().orderbook_sinks, 1);
    }

    #[test]
    fn receiver_count_decreases_on_drop() {
        let hub = BroadcastHub::with_defaults();

        {
            let _rx1 = hub.attach_trades(TRADES);
            assert_eq!(hub.trade_receiver_count(TRADES), 1);
        }

        assert_eq!(hub.trade_receiver_count(TRADES), 0);
        assert!(hub.has_sink(TRADES));
    }

    #[tokio::test]
    async fn publish_and_receive_orderbook() {
        let hub = BroadcastHub::with_defaults();
        let mut rx = hub.attach_orderbook(BOOK);

        assert_eq!(hub.publish_orderbook(BOOK, make_update(100.0)), Some(1));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.book.best_bid().map(|l| l.price), Some(100.0));
    }

    #[test]
    fn latest_orderbook_is_retained() {
        let hub = BroadcastHub::with_defaults();
        let _rx = hub.attach_orderbook(BOOK);

        let _ = hub.publish_orderbook(BOOK, make_update(100.0));
        let _ = hub.publish_orderbook(BOOK, make_update(101.0));

        let latest = hub.latest_orderbook(BOOK).unwrap();
        assert_eq!(latest.book.best_bid().map(|l| l.price), Some(101.0));
    }

    #[tokio::test]
    async fn multiple_receivers_get_same_print() {
        let hub = BroadcastHub::with_defaults();
        let mut rx1 = hub.attach_trades(TRADES);
        let mut rx2 = hub.attach_trades(TRADES);

        assert_eq!(hub.publish_trade(TRADES, make_print()), Some(2));

        assert_eq!(rx1.recv().await.unwrap(), rx2.recv().await.unwrap());
    }

    #[test]
    fn publish_without_sink_returns_none() {
        let hub = BroadcastHub::with_defaults();
        assert!(hub.publish_trade(TRADES, make_print()).is_none());
        assert!(hub.publish_orderbook(BOOK, make_update(1.0)).is_none());
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let hub = BroadcastHub::with_defaults();
        drop(hub.attach_trades(TRADES));
        assert_eq!(hub.publish_trade(TRADES, make_print()), Some(0));
    }

    #[tokio::test]
    async fn detach_closes_receivers_and_drops_latest() {
        let hub = BroadcastHub::with_defaults();
        let mut rx = hub.attach_orderbook(BOOK);
        let _ = hub.publish_orderbook(BOOK, make_update(1.0));
        let _ = rx.recv().await.unwrap();

        hub.detach(BOOK);

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(hub.latest_orderbook(BOOK).is_none());
    }

    #[test]
    fn stats_reflect_all_sinks() {
        let hub = BroadcastHub::new(BroadcastConfig {
            orderbook_capacity: 8,
            trades_capacity: 8,
        });

        let _rx1 = hub.attach_orderbook(BOOK);
        let _rx2 = hub.attach_trades(TRADES);
        let _rx3 = hub.attach_trades("ethusdt@aggTrade");

        let stats = hub.stats();
        assert_eq!(stats.orderbook_sinks, 1);
        assert_eq!(stats.trade_sinks, 2);
        assert_eq!(stats.total_receivers(), 3);
    }
}
