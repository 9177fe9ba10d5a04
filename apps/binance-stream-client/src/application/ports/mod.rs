//! Port Interfaces
//!
//! Defines the interfaces (ports) the stream client drives, following
//! the Hexagonal Architecture pattern. Infrastructure adapters implement
//! these contracts.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: Opens a duplex text-frame transport to the exchange
//! - `InstrumentDictionary`: Symbol lookup (see `domain::instrument`)

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

pub use crate::domain::instrument::InstrumentDictionary;

// =============================================================================
// Errors
// =============================================================================

/// Transport-level errors.
///
/// All of these are fatal for the connection they occur on and are handled
/// by the reconnect state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
}

// =============================================================================
// Transport
// =============================================================================

/// Outbound half of a transport: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a transport: yields text frames.
///
/// End of stream and error items both mean the connection is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open duplex connection carrying text frames.
pub struct Transport {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

impl Transport {
    /// Assemble a transport from its halves.
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` if the connection cannot be opened.
    async fn connect(&self, url: &str) -> Result<Transport, TransportError>;
}
