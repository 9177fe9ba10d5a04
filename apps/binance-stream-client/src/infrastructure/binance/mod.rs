//! Binance Stream Adapters
//!
//! Client for the Binance combined market data stream:
//!
//! - **Client**: Connection lifecycle, coalesced connects, resubscription
//! - **Codec**: JSON requests and inbound frame classification
//! - **Router**: Normalizes payloads and delivers them to sinks
//! - **Transport**: WebSocket connector over `tokio-tungstenite`

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod router;
pub mod transport;

pub use client::{
    ClientError, ClientStats, ConnectionEvent, ConnectionHandle, ConnectionState, StreamClient,
    StreamClientConfig, Subscription,
};
pub use codec::{CodecError, JsonCodec};
pub use messages::*;
pub use reconnect::{MIN_RECONNECT_DELAY, ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use router::{DispatchOutcome, DropReason, MessageRouter, RouteOutcome};
pub use transport::WebSocketConnector;
