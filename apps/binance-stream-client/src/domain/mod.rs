//! Domain Layer - Channel keys, canonical records and subscription state.
//!
//! This layer has no I/O. Everything here is pure Rust with serialization
//! support and is exercised directly by unit tests.

/// Channel keys and the stream name codec.
pub mod channel;

/// Instruments and the dictionary port.
pub mod instrument;

/// Canonical order book and trade print records.
pub mod streaming;

/// Reference-counted subscription registry.
pub mod subscription;
