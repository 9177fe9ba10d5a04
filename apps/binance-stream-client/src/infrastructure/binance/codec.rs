//! Stream Codec Module
//!
//! JSON encoding of subscription requests and classification of inbound
//! frames. Every frame on the combined stream endpoint is a single JSON
//! object; data frames carry a `stream` field, control frames carry an
//! `id` with either `result` or `error`.

use serde::de::DeserializeOwned;

use crate::infrastructure::binance::messages::{
    DepthPayload, ErrorMessage, InboundFrame, Method, ResponseMessage, StreamEnvelope,
    StreamRequest, TradePayload,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is JSON but not a known frame shape.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the combined stream endpoint.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a subscription change request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_request(
        &self,
        method: Method,
        params: Vec<String>,
        id: u64,
    ) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&StreamRequest { method, params, id })?)
    }

    /// Classify an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON or matches no known shape.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let Some(object) = value.as_object() else {
            return Err(CodecError::InvalidFormat(preview(text)));
        };

        if object.contains_key("stream") {
            let envelope: StreamEnvelope = serde_json::from_value(value)?;
            Ok(InboundFrame::Data(envelope))
        } else if object.contains_key("error") {
            let error: ErrorMessage = serde_json::from_value(value)?;
            Ok(InboundFrame::Error(error))
        } else if object.contains_key("result") {
            let response: ResponseMessage = serde_json::from_value(value)?;
            Ok(InboundFrame::Response(response))
        } else {
            Err(CodecError::InvalidFormat(preview(text)))
        }
    }

    /// Decode an order book payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a depth snapshot.
    pub fn decode_depth(&self, data: &serde_json::Value) -> Result<DepthPayload, CodecError> {
        decode_payload(data)
    }

    /// Decode a trade payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a trade.
    pub fn decode_trade(&self, data: &serde_json::Value) -> Result<TradePayload, CodecError> {
        decode_payload(data)
    }
}

fn decode_payload<T: DeserializeOwned>(data: &serde_json::Value) -> Result<T, CodecError> {
    Ok(T::deserialize(data)?)
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
