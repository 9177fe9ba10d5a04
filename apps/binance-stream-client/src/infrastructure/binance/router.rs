//! Message Router
//!
//! Demultiplexes inbound frames by channel name, converts exchange payloads
//! into canonical records and pushes them into the sink owning the channel.
//!
//! Frames that cannot be delivered (unknown channel, unknown symbol,
//! malformed payload) are dropped and counted; the stream always continues.

use std::sync::Arc;
use std::time::Instant;

use crate::domain::channel::{ChannelKeyCodec, DataKind};
use crate::domain::instrument::InstrumentDictionary;
use crate::domain::streaming::OrderBookUpdate;
use crate::infrastructure::binance::codec::JsonCodec;
use crate::infrastructure::binance::messages::InboundFrame;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics;

// =============================================================================
// Outcomes
// =============================================================================

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The frame is not valid JSON or not a known frame shape.
    MalformedFrame,
    /// The channel name is not one this client handles.
    UnknownChannel,
    /// The symbol prefix is not in the instrument dictionary.
    UnknownSymbol,
    /// The payload does not match the channel's kind.
    MalformedPayload,
    /// A numeric field could not be parsed.
    InvalidNumber,
}

impl DropReason {
    /// Snake case name, used for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedFrame => "malformed_frame",
            Self::UnknownChannel => "unknown_channel",
            Self::UnknownSymbol => "unknown_symbol",
            Self::MalformedPayload => "malformed_payload",
            Self::InvalidNumber => "invalid_number",
        }
    }
}

/// Result of dispatching one data payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record reached the channel's sink.
    Delivered {
        /// Kind of record delivered.
        kind: DataKind,
        /// Receivers that got the record.
        receivers: usize,
    },
    /// The record was valid but no sink is attached for the channel.
    NoSink,
    /// The payload was dropped.
    Dropped(DropReason),
}

/// Result of routing one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A data frame was dispatched.
    Data(DispatchOutcome),
    /// The exchange acknowledged a request.
    Acknowledged {
        /// Request id.
        id: Option<u64>,
    },
    /// The exchange rejected a request.
    Rejected {
        /// Request id.
        id: Option<u64>,
        /// Exchange error code.
        code: i64,
    },
    /// The frame could not be parsed.
    Malformed,
}

// =============================================================================
// Router
// =============================================================================

/// Inbound frame router and normalizer.
pub struct MessageRouter {
    codec: JsonCodec,
    dictionary: Arc<dyn InstrumentDictionary>,
    hub: SharedBroadcastHub,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

impl MessageRouter {
    /// Create a router delivering into `hub`.
    #[must_use]
    pub fn new(dictionary: Arc<dyn InstrumentDictionary>, hub: SharedBroadcastHub) -> Self {
        Self {
            codec: JsonCodec::new(),
            dictionary,
            hub,
        }
    }

    /// Parse and route one inbound text frame.
    pub fn route_frame(&self, text: &str) -> RouteOutcome {
        let start = Instant::now();
        metrics::record_frame_received();

        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed frame");
                metrics::record_frame_dropped(DropReason::MalformedFrame.as_str());
                return RouteOutcome::Malformed;
            }
        };

        let outcome = match frame {
            InboundFrame::Data(envelope) => {
                RouteOutcome::Data(self.dispatch(&envelope.stream, &envelope.data))
            }
            InboundFrame::Response(response) => {
                tracing::debug!(id = ?response.id, "Request acknowledged");
                RouteOutcome::Acknowledged { id: response.id }
            }
            InboundFrame::Error(error) => {
                tracing::warn!(
                    id = ?error.id,
                    code = error.error.code,
                    msg = %error.error.msg,
                    "Request rejected"
                );
                metrics::record_request_rejected();
                RouteOutcome::Rejected {
                    id: error.id,
                    code: error.error.code,
                }
            }
        };

        metrics::record_processing_duration(start.elapsed());
        outcome
    }

    /// Normalize a data payload and deliver it to the channel's sink.
    pub fn dispatch(&self, channel: &str, data: &serde_json::Value) -> DispatchOutcome {
        let outcome = match ChannelKeyCodec::decode(channel) {
            None => {
                tracing::trace!(channel, "Ignoring unrecognized channel");
                DispatchOutcome::Dropped(DropReason::UnknownChannel)
            }
            Some(decoded) => match self.dictionary.resolve(&decoded.symbol) {
                None => {
                    tracing::debug!(channel, symbol = %decoded.symbol, "Unknown symbol");
                    DispatchOutcome::Dropped(DropReason::UnknownSymbol)
                }
                Some(instrument) => match decoded.kind {
                    DataKind::Orderbook => self.dispatch_orderbook(channel, instrument, data),
                    DataKind::Trades => self.dispatch_trade(channel, &instrument, data),
                },
            },
        };

        match outcome {
            DispatchOutcome::Delivered { kind, receivers } => {
                metrics::record_delivered(kind, receivers);
            }
            DispatchOutcome::NoSink => {
                tracing::trace!(channel, "No sink attached");
            }
            DispatchOutcome::Dropped(reason) => {
                metrics::record_frame_dropped(reason.as_str());
            }
        }

        outcome
    }

    fn dispatch_orderbook(
        &self,
        channel: &str,
        instrument: crate::domain::instrument::Instrument,
        data: &serde_json::Value,
    ) -> DispatchOutcome {
        let payload = match self.codec.decode_depth(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(channel, error = %e, "Malformed depth payload");
                return DispatchOutcome::Dropped(DropReason::MalformedPayload);
            }
        };

        let last_update_id = payload.last_update_id;
        let book = match payload.into_book() {
            Ok(book) => book,
            Err(e) => {
                tracing::debug!(channel, error = %e, "Invalid depth level");
                return DispatchOutcome::Dropped(DropReason::InvalidNumber);
            }
        };

        let update = OrderBookUpdate {
            instrument,
            channel: channel.to_string(),
            last_update_id,
            book,
        };

        self.hub
            .publish_orderbook(channel, update)
            .map_or(DispatchOutcome::NoSink, |receivers| {
                DispatchOutcome::Delivered {
                    kind: DataKind::Orderbook,
                    receivers,
                }
            })
    }

    fn dispatch_trade(
        &self,
        channel: &str,
        instrument: &crate::domain::instrument::Instrument,
        data: &serde_json::Value,
    ) -> DispatchOutcome {
        let payload = match self.codec.decode_trade(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(channel, error = %e, "Malformed trade payload");
                return DispatchOutcome::Dropped(DropReason::MalformedPayload);
            }
        };

        let symbol = self.dictionary.canonical_symbol(instrument);
        let print = match payload.into_print(symbol) {
            Ok(print) => print,
            Err(e) => {
                tracing::debug!(channel, error = %e, "Invalid trade number");
                return DispatchOutcome::Dropped(DropReason::InvalidNumber);
            }
        };

        self.hub
            .publish_trade(channel, print)
            .map_or(DispatchOutcome::NoSink, |receivers| {
                DispatchOutcome::Delivered {
                    kind: DataKind::Trades,
                    receivers,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use mockall::mock;

    use super::*;
    use crate::domain::instrument::{Instrument, StaticInstrumentDictionary};
    use crate::domain::streaming::{PriceLevel, Side, TradePrint};
    use crate::infrastructure::broadcast::BroadcastHub;

    mock! {
        Dictionary {}

        impl InstrumentDictionary for Dictionary {
            fn resolve(&self, symbol: &str) -> Option<Instrument>;
            fn canonical_symbol(&self, instrument: &Instrument) -> String;
        }
    }

    fn router_with(symbols: &[&str]) -> (MessageRouter, SharedBroadcastHub) {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let dictionary = Arc::new(StaticInstrumentDictionary::binance(symbols.iter().copied()));
        (MessageRouter::new(dictionary, Arc::clone(&hub)), hub)
    }

    fn trade_json(m: bool) -> serde_json::Value {
        serde_json::json!({
            "e": "aggTrade", "E": 1_690_000_000_000_i64, "s": "BTCUSDT",
            "a": 555, "p": "30000.1", "q": "0.01", "m": m
        })
    }

    #[tokio::test]
    async fn trade_is_normalized_and_delivered() {
        let (router, hub) = router_with(&["BTCUSDT"]);
        let mut rx = hub.attach_trades("btcusdt@aggTrade");

        let outcome = router.dispatch("btcusdt@aggTrade", &trade_json(true));

        assert_eq!(outcome, DispatchOutcome::Delivered {
            kind: DataKind::Trades,
            receivers: 1,
        });
        assert_eq!(rx.recv().await.unwrap(), TradePrint {
            order_id: 555,
            side: Side::Sell,
            timestamp: 1_690_000_000_000,
            symbol: "BTCUSDT".to_string(),
            price: 30000.1,
            volume: 0.01,
        });
    }

    #[tokio::test]
    async fn buyer_taker_trade_is_buy() {
        let (router, hub) = router_with(&["BTCUSDT"]);
        let mut rx = hub.attach_trades("btcusdt@aggTrade");

        let _ = router.dispatch("btcusdt@aggTrade", &trade_json(false));

        assert_eq!(rx.recv().await.unwrap().side, Side::Buy);
    }

    #[tokio::test]
    async fn orderbook_is_normalized_and_retained() {
        let (router, hub) = router_with(&["BTCUSDT"]);
        let mut rx = hub.attach_orderbook("btcusdt@depth20@100ms");
        let data = serde_json::json!({
            "lastUpdateId": 42,
            "bids": [["100.5", "2.0"]],
            "asks": [["100.6", "1.0"]]
        });

        let outcome = router.dispatch("btcusdt@depth20@100ms", &data);

        assert!(matches!(outcome, DispatchOutcome::Delivered {
            kind: DataKind::Orderbook,
            ..
        }));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.last_update_id, Some(42));
        assert_eq!(update.book.bids, vec![PriceLevel::new(100.5, 2.0)]);
        assert_eq!(
            hub.latest_orderbook("btcusdt@depth20@100ms"),
            Some(update)
        );
    }

    #[test]
    fn already_processed_levels_pass_through() {
        let (router, hub) = router_with(&["BTCUSDT"]);
        let _rx = hub.attach_orderbook("btcusdt@depth20@100ms");
        let data = serde_json::json!({
            "bids": [{"price": 1.5, "volume": 2.5, "processed": true}],
            "asks": []
        });

        let _ = router.dispatch("btcusdt@depth20@100ms", &data);

        let latest = hub.latest_orderbook("btcusdt@depth20@100ms").unwrap();
        assert_eq!(latest.book.bids, vec![PriceLevel::new(1.5, 2.5)]);
    }

    #[test]
    fn unknown_channel_is_dropped() {
        let (router, _hub) = router_with(&["BTCUSDT"]);

        let outcome = router.dispatch("btcusdt@kline_1m", &serde_json::json!({}));

        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::UnknownChannel));
    }

    #[test]
    fn unknown_symbol_is_dropped() {
        let (router, hub) = router_with(&["BTCUSDT"]);
        let _rx = hub.attach_trades("xrpusdt@aggTrade");

        let outcome = router.dispatch("xrpusdt@aggTrade", &trade_json(true));

        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::UnknownSymbol));
    }

    #[test]
    fn invalid_number_is_dropped() {
        let (router, hub) = router_with(&["BTCUSDT"]);
        let _rx = hub.attach_orderbook("btcusdt@depth20@100ms");
        let data = serde_json::json!({"bids": [["abc", "1"]], "asks": []});

        let outcome = router.dispatch("btcusdt@depth20@100ms", &data);

        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::InvalidNumber));
        assert!(hub.latest_orderbook("btcusdt@depth20@100ms").is_none());
    }

    #[test]
    fn mismatched_payload_is_dropped() {
        let (router, _hub) = router_with(&["BTCUSDT"]);

        let outcome = router.dispatch("btcusdt@aggTrade", &serde_json::json!({"bids": []}));

        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(DropReason::MalformedPayload)
        );
    }

    #[test]
    fn valid_payload_without_sink() {
        let (router, _hub) = router_with(&["BTCUSDT"]);
        assert_eq!(
            router.dispatch("btcusdt@aggTrade", &trade_json(true)),
            DispatchOutcome::NoSink
        );
    }

    #[test]
    fn trade_uses_canonical_symbol_from_dictionary() {
        let mut dictionary = MockDictionary::new();
        dictionary
            .expect_resolve()
            .withf(|symbol| symbol == "BTCUSDT")
            .times(1)
            .returning(|_| Some(Instrument::binance("BTCUSDT")));
        dictionary
            .expect_canonical_symbol()
            .times(1)
            .returning(|_| "BTC/USDT".to_string());

        let hub = Arc::new(BroadcastHub::with_defaults());
        let mut rx = hub.attach_trades("btcusdt@aggTrade");
        let router = MessageRouter::new(Arc::new(dictionary), Arc::clone(&hub));

        let _ = router.dispatch("btcusdt@aggTrade", &trade_json(true));

        assert_eq!(rx.try_recv().unwrap().symbol, "BTC/USDT");
    }

    #[test]
    fn unknown_channel_never_consults_dictionary() {
        let mut dictionary = MockDictionary::new();
        dictionary.expect_resolve().never();

        let router = MessageRouter::new(
            Arc::new(dictionary),
            Arc::new(BroadcastHub::with_defaults()),
        );

        let _ = router.dispatch("btcusdt@bookTicker", &serde_json::json!({}));
    }

    #[test]
    fn route_frame_handles_control_frames() {
        let (router, _hub) = router_with(&["BTCUSDT"]);

        assert_eq!(
            router.route_frame(r#"{"result":null,"id":1}"#),
            RouteOutcome::Acknowledged { id: Some(1) }
        );
        assert_eq!(
            router.route_frame(r#"{"error":{"code":2,"msg":"bad"},"id":2}"#),
            RouteOutcome::Rejected {
                id: Some(2),
                code: 2
            }
        );
        assert_eq!(router.route_frame("{"), RouteOutcome::Malformed);
    }

    #[test]
    fn bad_frame_then_valid_frame() {
        let (router, hub) = router_with(&["BTCUSDT"]);
        let mut rx = hub.attach_trades("btcusdt@aggTrade");
        let valid = serde_json::json!({"stream": "btcusdt@aggTrade", "data": trade_json(true)});

        let first = router.route_frame(r#"{"stream":"nonsense","data":{}}"#);
        let second = router.route_frame(&valid.to_string());

        assert_eq!(
            first,
            RouteOutcome::Data(DispatchOutcome::Dropped(DropReason::UnknownChannel))
        );
        assert!(matches!(second, RouteOutcome::Data(DispatchOutcome::Delivered { .. })));
        assert_eq!(rx.try_recv().unwrap().order_id, 555);
        assert!(rx.try_recv().is_err());
    }
}
