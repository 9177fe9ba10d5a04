//! Instrument Types
//!
//! Instruments are owned by an external dictionary. The stream client only
//! needs to resolve a symbol to an instrument and to ask the dictionary for
//! the canonical symbol it should stamp on outgoing records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Exchange an instrument is listed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Binance spot.
    Binance,
    /// Any other venue.
    Other(String),
}

/// A tradable instrument as known to the dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange symbol, upper case (e.g. `BTCUSDT`).
    pub symbol: String,
    /// Listing exchange.
    pub exchange: Exchange,
}

impl Instrument {
    /// Create a Binance instrument.
    #[must_use]
    pub fn binance(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            exchange: Exchange::Binance,
        }
    }

    /// Whether the instrument can be streamed by this client.
    #[must_use]
    pub fn is_binance(&self) -> bool {
        self.exchange == Exchange::Binance
    }
}

// =============================================================================
// Dictionary Port
// =============================================================================

/// Symbol lookup supplied by the instrument dictionary.
///
/// Lookups are made with the upper-cased symbol prefix of a stream name, so
/// implementations only need to handle upper-case keys.
pub trait InstrumentDictionary: Send + Sync {
    /// Resolve an upper-case symbol to an instrument.
    fn resolve(&self, symbol: &str) -> Option<Instrument>;

    /// The symbol downstream consumers know this instrument by.
    fn canonical_symbol(&self, instrument: &Instrument) -> String {
        instrument.symbol.clone()
    }
}

/// In-memory dictionary backed by a fixed symbol table.
#[derive(Debug, Default, Clone)]
pub struct StaticInstrumentDictionary {
    instruments: HashMap<String, Instrument>,
}

impl StaticInstrumentDictionary {
    /// Create an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dictionary of Binance instruments from symbols.
    #[must_use]
    pub fn binance<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dictionary = Self::new();
        for symbol in symbols {
            dictionary.insert(Instrument::binance(symbol));
        }
        dictionary
    }

    /// Add or replace an instrument.
    pub fn insert(&mut self, instrument: Instrument) {
        self.instruments
            .insert(instrument.symbol.to_uppercase(), instrument);
    }

    /// Number of known instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl InstrumentDictionary for StaticInstrumentDictionary {
    fn resolve(&self, symbol: &str) -> Option<Instrument> {
        self.instruments.get(&symbol.to_uppercase()).cloned()
    }
}
