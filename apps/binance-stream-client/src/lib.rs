#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Binance Stream Client - Market Data Multiplexer
//!
//! Maintains a single combined-stream WebSocket connection to Binance and
//! multiplexes reference-counted order book and trade subscriptions to
//! in-process consumers.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `channel`: Channel keys and the channel name codec
//!   - `instrument`: Instruments and the dictionary that resolves them
//!   - `streaming`: Canonical order book and trade records
//!   - `subscription`: Reference-counted subscription registry
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport connector and instrument dictionary interfaces
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Stream client, codec, router, WebSocket connector
//!   - `broadcast`: Per-channel sinks for normalized records
//!   - `config`: Configuration from environment variables
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                        ┌──────────────┐     ┌─────────────┐
//! Binance combined WS ──►│    Router    │────►│    Sinks    │──► Subscription 1
//!   (one connection)     │  (normalize) │     │ (broadcast) │──► Subscription 2
//!          ▲             └──────────────┘     └─────────────┘──► Subscription N
//!          │
//!   SUBSCRIBE / UNSUBSCRIBE on 0 <-> 1 reference transitions
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::channel::{ChannelError, ChannelKey, ChannelKeyCodec, ChannelParams, DataKind};
pub use domain::instrument::{Exchange, Instrument, InstrumentDictionary, StaticInstrumentDictionary};
pub use domain::streaming::{OrderBook, OrderBookUpdate, PriceLevel, Side, TradePrint};
pub use domain::subscription::{RefChange, RegistryError, RegistryStats, SubscriptionRegistry};

// Ports
pub use application::ports::{Connector, Transport, TransportError};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ClientConfig, ConfigError, ReconnectSettings, ServerSettings,
    StreamSettings,
};

// Stream client
pub use infrastructure::binance::{
    ClientError, ConnectionEvent, ConnectionHandle, ConnectionState, Method, StreamClient,
    StreamClientConfig, Subscription, WebSocketConnector,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub,
};

// Metrics
pub use infrastructure::metrics::{MetricsError, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
