//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames received, dropped by reason, delivered by kind
//! - **Requests**: SUBSCRIBE/UNSUBSCRIBE requests sent and rejected
//! - **Connection**: Open state, reconnect attempts, transport errors
//! - **Subscriptions**: Channels holding references
//! - **Latency**: Frame routing duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::channel::DataKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(String),
}

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "binance_stream_frames_received_total",
        "Total inbound frames received from the stream"
    );
    describe_counter!(
        "binance_stream_frames_dropped_total",
        "Total inbound frames dropped by reason"
    );
    describe_counter!(
        "binance_stream_records_delivered_total",
        "Total normalized records delivered to sinks"
    );
    describe_counter!(
        "binance_stream_consumer_lagged_total",
        "Total records skipped by slow consumers"
    );

    // Request counters
    describe_counter!(
        "binance_stream_requests_sent_total",
        "Total subscription requests sent by method"
    );
    describe_counter!(
        "binance_stream_requests_rejected_total",
        "Total subscription requests rejected by the exchange"
    );

    // Connection
    describe_gauge!(
        "binance_stream_connection_open",
        "Whether the stream connection is open (1) or not (0)"
    );
    describe_counter!(
        "binance_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_counter!(
        "binance_stream_transport_errors_total",
        "Total transport errors by operation"
    );

    // Subscriptions
    describe_gauge!(
        "binance_stream_active_channels",
        "Number of channels holding at least one reference"
    );

    // Latency histograms
    describe_histogram!(
        "binance_stream_frame_processing_seconds",
        "Time to decode, normalize and deliver one frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an inbound frame.
pub fn record_frame_received() {
    counter!("binance_stream_frames_received_total").increment(1);
}

/// Record a dropped frame.
pub fn record_frame_dropped(reason: &'static str) {
    counter!(
        "binance_stream_frames_dropped_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a record delivered to a sink.
pub fn record_delivered(kind: DataKind, receivers: usize) {
    counter!(
        "binance_stream_records_delivered_total",
        "kind" => kind.as_str()
    )
    .increment(1);
    tracing::trace!(kind = kind.as_str(), receivers, "Record delivered");
}

/// Record records skipped by a lagging consumer.
pub fn record_consumer_lagged(skipped: u64) {
    counter!("binance_stream_consumer_lagged_total").increment(skipped);
}

/// Record a subscription request sent.
pub fn record_request_sent(method: &'static str) {
    counter!(
        "binance_stream_requests_sent_total",
        "method" => method
    )
    .increment(1);
}

/// Record a request rejected by the exchange.
pub fn record_request_rejected() {
    counter!("binance_stream_requests_rejected_total").increment(1);
}

/// Update the connection open gauge.
pub fn set_connected(open: bool) {
    gauge!("binance_stream_connection_open").set(if open { 1.0 } else { 0.0 });
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("binance_stream_reconnects_total").increment(1);
}

/// Record a transport error.
pub fn record_transport_error(operation: &'static str) {
    counter!(
        "binance_stream_transport_errors_total",
        "operation" => operation
    )
    .increment(1);
}

/// Update the active channel count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_channels(count: usize) {
    gauge!("binance_stream_active_channels").set(count as f64);
}

/// Record frame processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("binance_stream_frame_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_frame_dropped("unknown_channel");
        record_delivered(DataKind::Trades, 2);
        record_request_sent("SUBSCRIBE");
        set_connected(true);
        set_active_channels(3);
        record_processing_duration(Duration::from_micros(15));
    }

    #[test]
    fn handle_absent_before_init() {
        if PROMETHEUS_HANDLE.get().is_none() {
            assert!(get_metrics_handle().is_none());
        }
    }
}
