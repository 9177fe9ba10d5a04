//! Application Layer - Port definitions.
//!
//! The interfaces through which the stream client reaches the exchange
//! and the instrument dictionary.

/// Port interfaces for external systems (transport, instrument lookup).
pub mod ports;
