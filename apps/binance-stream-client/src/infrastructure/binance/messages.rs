//! Binance WebSocket Message Types
//!
//! Wire format types for the combined stream endpoint.
//!
//! # Outbound
//!
//! ```json
//! {"method":"SUBSCRIBE","params":["btcusdt@aggTrade"],"id":1}
//! ```
//!
//! # Inbound
//!
//! - Data: `{"stream":"btcusdt@aggTrade","data":{...}}`
//! - Response: `{"result":null,"id":1}`
//! - Error: `{"error":{"code":2,"msg":"Invalid request"},"id":1}`
//!
//! # References
//!
//! - [WebSocket Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)

use serde::{Deserialize, Serialize};

use crate::domain::streaming::{
    BookEntry, NormalizeError, OrderBook, Side, TradePrint, parse_number,
};

// =============================================================================
// Outbound Requests
// =============================================================================

/// Request method for live subscription changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Start receiving channels.
    Subscribe,
    /// Stop receiving channels.
    Unsubscribe,
}

impl Method {
    /// Wire name, used for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
        }
    }
}

/// Subscription change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Request method.
    pub method: Method,
    /// Channel names.
    pub params: Vec<String>,
    /// Request id, unique for the life of the client.
    pub id: u64,
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// Data frame from the combined stream endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEnvelope {
    /// Channel name the payload belongs to.
    pub stream: String,
    /// Raw payload, decoded by kind.
    pub data: serde_json::Value,
}

/// Successful request acknowledgment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseMessage {
    /// Result value; `null` for subscription changes.
    #[serde(default)]
    pub result: serde_json::Value,
    /// Id of the acknowledged request.
    pub id: Option<u64>,
}

/// Error body of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    /// Exchange error code.
    pub code: i64,
    /// Human readable message.
    pub msg: String,
}

/// Rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorMessage {
    /// Error details.
    pub error: ErrorBody,
    /// Id of the rejected request, when known.
    pub id: Option<u64>,
}

/// Any frame received on the stream connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Channel data.
    Data(StreamEnvelope),
    /// Request acknowledgment.
    Response(ResponseMessage),
    /// Request rejection.
    Error(ErrorMessage),
}

// =============================================================================
// Payloads
// =============================================================================

/// Partial book depth payload (`<symbol>@depth20@100ms`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DepthPayload {
    /// Exchange sequence of the snapshot.
    #[serde(rename = "lastUpdateId", default)]
    pub last_update_id: Option<u64>,
    /// Bid levels, best first.
    #[serde(default)]
    pub bids: Vec<BookEntry>,
    /// Ask levels, best first.
    #[serde(default)]
    pub asks: Vec<BookEntry>,
}

impl DepthPayload {
    /// Normalize the payload into a canonical book.
    ///
    /// # Errors
    ///
    /// Returns an error if any level does not contain valid numbers.
    pub fn into_book(self) -> Result<OrderBook, NormalizeError> {
        OrderBook::from_entries(self.bids, self.asks)
    }
}

/// Trade payload (`<symbol>@aggTrade` or `<symbol>@trade`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradePayload {
    /// Aggregate trade id (`a`), or trade id (`t`) on raw trade streams.
    #[serde(rename = "a", alias = "t")]
    pub trade_id: u64,
    /// Whether the buyer was the maker.
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
    /// Event time in milliseconds.
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Price.
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity.
    #[serde(rename = "q")]
    pub quantity: String,
}

impl TradePayload {
    /// Convert into a canonical trade print stamped with `symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if price or quantity are not valid numbers.
    pub fn into_print(self, symbol: String) -> Result<TradePrint, NormalizeError> {
        Ok(TradePrint {
            order_id: self.trade_id,
            side: Side::from_buyer_maker(self.is_buyer_maker),
            timestamp: self.event_time,
            symbol,
            price: parse_number("price", &self.price)?,
            volume: parse_number("volume", &self.quantity)?,
        })
    }
}
