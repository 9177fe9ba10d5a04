//! Stream Client
//!
//! Owns the single multiplexed connection to the combined stream endpoint.
//!
//! # Lifecycle
//!
//! ```text
//! Closed ──connect──► Connecting ──ok──► Open ──drop──► Reconnecting
//!   ▲                     │                               │     ▲
//!   │                     └────────fail──────────────────►┤     │
//!   │                                                     │  (delay)
//!   └──────────── shutdown / attempts exhausted ◄─────────┴─────┘
//! ```
//!
//! Concurrent connect calls share one in-flight attempt. On every open the
//! client replays a SUBSCRIBE for each channel that still has references,
//! so requests dropped while the connection was down are recovered.
//!
//! # Locking
//!
//! The subscription registry and the connection slot each sit behind a
//! `parking_lot::Mutex`. When both are needed the registry is locked first.
//! Neither lock is held across an await point.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    Connector, FrameSink, FrameStream, Transport, TransportError,
};
use crate::domain::channel::{ChannelKey, ChannelParams, DataKind};
use crate::domain::instrument::{Instrument, InstrumentDictionary};
use crate::domain::streaming::{OrderBookUpdate, TradePrint};
use crate::domain::subscription::{RefChange, RegistryError, RegistryStats, SubscriptionRegistry};
use crate::infrastructure::binance::codec::JsonCodec;
use crate::infrastructure::binance::messages::Method;
use crate::infrastructure::binance::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::infrastructure::binance::router::MessageRouter;
use crate::infrastructure::broadcast::{BroadcastHub, SharedBroadcastHub};
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::metrics;

const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Configuration
// =============================================================================

/// Stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Combined stream URL.
    pub url: String,
    /// Parameters for order book subscriptions.
    pub orderbook_params: ChannelParams,
    /// Parameters for trade subscriptions.
    pub trade_params: ChannelParams,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Reconnection policy configuration.
    pub reconnect: ReconnectConfig,
}

impl StreamClientConfig {
    /// Build the client configuration from the loaded settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream URL or channel parameters are invalid.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            url: config.stream.stream_url()?.to_string(),
            orderbook_params: config.stream.orderbook_params()?,
            trade_params: config.stream.trade_params(),
            connect_timeout: config.stream.connect_timeout,
            reconnect: ReconnectConfig::from_settings(&config.reconnect),
        })
    }

    /// Configuration for `url` with default channel parameters.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            orderbook_params: ChannelParams::Orderbook { interval_ms: 100 },
            trade_params: ChannelParams::Trades { aggregated: false },
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Errors and Events
// =============================================================================

/// Stream client errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The transport failed to connect.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection attempt timed out.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The automatic reconnect loop is waiting out its delay.
    #[error("connection is reconnecting")]
    Reconnecting,

    /// The client has been shut down.
    #[error("client is shut down")]
    Shutdown,

    /// No reference is held for the channel.
    #[error("not subscribed to {0}")]
    NotSubscribed(String),

    /// The instrument is not listed on this exchange.
    #[error("instrument {0} is not a Binance instrument")]
    UnsupportedExchange(String),
}

impl From<RegistryError> for ClientError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownReference(channel) => Self::NotSubscribed(channel),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and no reconnect pending.
    Closed,
    /// A connection attempt is in flight.
    Connecting,
    /// The connection is open.
    Open,
    /// Waiting to reconnect after an unplanned close.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Events emitted by the stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection was opened.
    Connected {
        /// Connection sequence number.
        connection_id: u64,
    },
    /// Channels were resubscribed on a new connection.
    Resubscribed {
        /// Number of SUBSCRIBE requests sent.
        channels: usize,
    },
    /// The connection closed unexpectedly.
    Disconnected {
        /// Connection sequence number.
        connection_id: u64,
    },
    /// A reconnect is scheduled.
    Reconnecting {
        /// Attempt number since the last successful open.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The reconnect policy gave up.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
}

// =============================================================================
// Connection Handle
// =============================================================================

/// Handle to an open connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Connection sequence number, starting at 1.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

type ConnectFuture = Shared<BoxFuture<'static, Result<ConnectionHandle, ClientError>>>;

enum ConnectionSlot {
    Closed,
    Connecting(ConnectFuture),
    Open(ConnectionHandle),
    Reconnecting,
}

impl ConnectionSlot {
    const fn state(&self) -> ConnectionState {
        match self {
            Self::Closed => ConnectionState::Closed,
            Self::Connecting(_) => ConnectionState::Connecting,
            Self::Open(_) => ConnectionState::Open,
            Self::Reconnecting => ConnectionState::Reconnecting,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Statistics snapshot of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ClientStats {
    /// Connection state.
    pub state: ConnectionState,
    /// Registry statistics.
    pub registry: RegistryStats,
    /// Reconnect attempts over the life of the client.
    pub reconnect_attempts: u64,
    /// Connections opened over the life of the client.
    pub connections_opened: u64,
    /// Last request id allocated (0 before the first request).
    pub last_request_id: u64,
}

/// Streaming market data client with reference-counted subscriptions.
///
/// Cloning is cheap; clones share the connection and registry.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: StreamClientConfig,
    connector: Arc<dyn Connector>,
    codec: JsonCodec,
    router: MessageRouter,
    hub: SharedBroadcastHub,
    registry: Mutex<SubscriptionRegistry>,
    slot: Mutex<ConnectionSlot>,
    policy: Mutex<ReconnectPolicy>,
    request_id: AtomicU64,
    connection_seq: AtomicU64,
    reconnect_attempts: AtomicU64,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a new client. No connection is opened until needed.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        connector: Arc<dyn Connector>,
        dictionary: Arc<dyn InstrumentDictionary>,
        hub: SharedBroadcastHub,
        cancel: CancellationToken,
    ) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        let router = MessageRouter::new(dictionary, Arc::clone(&hub));
        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                codec: JsonCodec::new(),
                router,
                hub,
                registry: Mutex::new(SubscriptionRegistry::new()),
                slot: Mutex::new(ConnectionSlot::Closed),
                policy: Mutex::new(policy),
                request_id: AtomicU64::new(0),
                connection_seq: AtomicU64::new(0),
                reconnect_attempts: AtomicU64::new(0),
                events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
                shutdown: cancel,
            }),
        }
    }

    /// Open the connection, or join the attempt already in flight.
    ///
    /// Resolves immediately with the current handle when already open.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Reconnecting` while the reconnect loop is
    /// waiting, `ClientError::Shutdown` after shutdown, or the error of the
    /// failed attempt.
    pub async fn connect(&self) -> Result<ConnectionHandle, ClientError> {
        self.inner.establish(false).await
    }

    /// Send a subscription change on the open connection.
    ///
    /// Returns `false` without allocating a request id when not open.
    pub fn send(&self, method: Method, channels: Vec<String>) -> bool {
        self.inner.send(method, channels)
    }

    /// Add a reference to a channel, subscribing upstream on the first one.
    pub fn add_reference(&self, key: &ChannelKey) -> RefChange {
        let (change, ()) = self.inner.add_reference_with(key, |hub, channel| match key.kind() {
            DataKind::Orderbook => drop(hub.attach_orderbook(channel)),
            DataKind::Trades => drop(hub.attach_trades(channel)),
        });
        change
    }

    /// Remove a reference, unsubscribing upstream on the last one.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotSubscribed` if no reference is held.
    pub fn remove_reference(&self, key: &ChannelKey) -> Result<RefChange, ClientError> {
        self.inner.remove_reference(key)
    }

    /// Subscribe to order book snapshots for an instrument.
    ///
    /// The reference is released when the returned subscription is dropped.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::UnsupportedExchange` for non-Binance instruments
    /// and `ClientError::Shutdown` after shutdown. Connection failures are
    /// not errors: the subscription is replayed once connected.
    pub async fn subscribe_orderbook(
        &self,
        instrument: &Instrument,
    ) -> Result<Subscription<OrderBookUpdate>, ClientError> {
        self.prepare_subscription(instrument).await?;
        let key = ChannelKey::new(&instrument.symbol, self.inner.config.orderbook_params);
        let (_, receiver) = self
            .inner
            .add_reference_with(&key, BroadcastHub::attach_orderbook);
        Ok(Subscription::new(key, receiver, &self.inner))
    }

    /// Subscribe to trade prints for an instrument.
    ///
    /// # Errors
    ///
    /// Same as [`StreamClient::subscribe_orderbook`].
    pub async fn subscribe_trades(
        &self,
        instrument: &Instrument,
    ) -> Result<Subscription<TradePrint>, ClientError> {
        self.prepare_subscription(instrument).await?;
        let key = ChannelKey::new(&instrument.symbol, self.inner.config.trade_params);
        let (_, receiver) = self
            .inner
            .add_reference_with(&key, BroadcastHub::attach_trades);
        Ok(Subscription::new(key, receiver, &self.inner))
    }

    /// Close the connection and stop reconnecting. Later connects fail.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().state()
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Channels that currently hold references.
    #[must_use]
    pub fn active_channels(&self) -> BTreeSet<String> {
        self.inner.registry.lock().snapshot_active_channels()
    }

    /// Reference count for a channel.
    #[must_use]
    pub fn reference_count(&self, key: &ChannelKey) -> usize {
        self.inner.registry.lock().reference_count(key)
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// The sink hub records are delivered into.
    #[must_use]
    pub fn hub(&self) -> &SharedBroadcastHub {
        &self.inner.hub
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        let registry = self.inner.registry.lock().stats();
        ClientStats {
            state: self.state(),
            registry,
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::Relaxed),
            connections_opened: self.inner.connection_seq.load(Ordering::Relaxed),
            last_request_id: self.inner.request_id.load(Ordering::SeqCst),
        }
    }

    async fn prepare_subscription(&self, instrument: &Instrument) -> Result<(), ClientError> {
        if !instrument.is_binance() {
            return Err(ClientError::UnsupportedExchange(instrument.symbol.clone()));
        }

        match self.connect().await {
            Ok(_) => Ok(()),
            Err(ClientError::Shutdown) => Err(ClientError::Shutdown),
            Err(e) => {
                tracing::debug!(error = %e, "Subscribing while disconnected; replayed on connect");
                Ok(())
            }
        }
    }
}

// =============================================================================
// Connection Lifecycle
// =============================================================================

impl ClientInner {
    async fn establish(self: &Arc<Self>, is_reconnect: bool) -> Result<ConnectionHandle, ClientError> {
        let attempt = {
            let mut slot = self.slot.lock();
            if self.shutdown.is_cancelled() {
                return Err(ClientError::Shutdown);
            }
            match &*slot {
                ConnectionSlot::Open(handle) => return Ok(handle.clone()),
                ConnectionSlot::Connecting(attempt) => attempt.clone(),
                ConnectionSlot::Reconnecting if !is_reconnect => {
                    return Err(ClientError::Reconnecting);
                }
                ConnectionSlot::Closed | ConnectionSlot::Reconnecting => {
                    let inner = Arc::clone(self);
                    let attempt = async move { inner.open_connection(is_reconnect).await }
                        .boxed()
                        .shared();
                    *slot = ConnectionSlot::Connecting(attempt.clone());
                    // Drive the attempt even if every caller stops waiting.
                    tokio::spawn(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    async fn open_connection(
        self: Arc<Self>,
        is_reconnect: bool,
    ) -> Result<ConnectionHandle, ClientError> {
        tracing::info!(url = %self.config.url, is_reconnect, "Connecting to stream");

        let timeout = self.config.connect_timeout;
        let connected = tokio::select! {
            () = self.shutdown.cancelled() => Err(ClientError::Shutdown),
            result = tokio::time::timeout(timeout, self.connector.connect(&self.config.url)) => {
                match result {
                    Ok(Ok(transport)) => Ok(transport),
                    Ok(Err(e)) => Err(ClientError::Transport(e)),
                    Err(_) => Err(ClientError::ConnectTimeout(timeout)),
                }
            }
        };

        match connected {
            Ok(transport) => self.on_open(transport),
            Err(e) => {
                self.on_connect_failed(&e, is_reconnect);
                Err(e)
            }
        }
    }

    fn on_open(self: &Arc<Self>, transport: Transport) -> Result<ConnectionHandle, ClientError> {
        let Transport { sink, stream } = transport;
        let id = self.connection_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.shutdown.child_token();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            id,
            outbound,
            cancel: cancel.clone(),
        };

        tokio::spawn(write_loop(sink, outbound_rx, cancel, id));

        let resubscribed = {
            let mut registry = self.registry.lock();
            let mut slot = self.slot.lock();

            if self.shutdown.is_cancelled() {
                handle.cancel.cancel();
                *slot = ConnectionSlot::Closed;
                return Err(ClientError::Shutdown);
            }

            *slot = ConnectionSlot::Open(handle.clone());

            let channels = registry.snapshot_active_channels();
            for channel in &channels {
                let sent = self.transmit(&handle, Method::Subscribe, vec![channel.clone()]);
                registry.mark_channel_subscribed(channel, sent);
            }
            metrics::set_active_channels(registry.len());
            channels.len()
        };

        self.policy.lock().reset();
        tokio::spawn(read_loop(Arc::clone(self), stream, handle.clone()));

        metrics::set_connected(true);
        tracing::info!(connection_id = id, resubscribed, "Stream connected");
        let _ = self.events.send(ConnectionEvent::Connected { connection_id: id });
        if resubscribed > 0 {
            let _ = self.events.send(ConnectionEvent::Resubscribed {
                channels: resubscribed,
            });
        }

        Ok(handle)
    }

    fn on_connect_failed(self: &Arc<Self>, error: &ClientError, is_reconnect: bool) {
        tracing::warn!(error = %error, is_reconnect, "Stream connection failed");
        metrics::record_transport_error("connect");

        {
            let mut slot = self.slot.lock();
            if self.shutdown.is_cancelled() {
                *slot = ConnectionSlot::Closed;
                return;
            }
            *slot = ConnectionSlot::Reconnecting;
        }

        // A reconnect attempt is already driven by the reconnect loop.
        if !is_reconnect {
            self.spawn_reconnect();
        }
    }

    fn on_close(self: &Arc<Self>, handle: &ConnectionHandle, reason: &str) {
        handle.cancel.cancel();

        {
            let mut registry = self.registry.lock();
            let mut slot = self.slot.lock();
            match &*slot {
                ConnectionSlot::Open(current) if current.id == handle.id => {}
                _ => return,
            }
            registry.mark_all_wire_subscribed(false);
            *slot = if self.shutdown.is_cancelled() {
                ConnectionSlot::Closed
            } else {
                ConnectionSlot::Reconnecting
            };
        }

        metrics::set_connected(false);

        if self.shutdown.is_cancelled() {
            tracing::info!(connection_id = handle.id, "Stream connection closed");
            return;
        }

        tracing::warn!(connection_id = handle.id, reason, "Stream connection lost");
        let _ = self.events.send(ConnectionEvent::Disconnected {
            connection_id: handle.id,
        });
        self.spawn_reconnect();
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        tokio::spawn(Arc::clone(self).reconnect_loop());
    }

    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            let next = {
                let mut policy = self.policy.lock();
                policy.next_delay().map(|delay| (delay, policy.attempt_count()))
            };

            let Some((delay, attempt)) = next else {
                let attempts = {
                    let mut policy = self.policy.lock();
                    let attempts = policy.attempt_count();
                    // The next explicit connect starts with a full budget.
                    policy.reset();
                    attempts
                };
                let error = ReconnectError::MaxAttemptsExceeded(attempts);
                tracing::error!(error = %error, "Giving up on stream reconnection");
                *self.slot.lock() = ConnectionSlot::Closed;
                let _ = self.events.send(ConnectionEvent::ReconnectFailed { attempts });
                return;
            };

            self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            metrics::record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to stream"
            );
            let _ = self
                .events
                .send(ConnectionEvent::Reconnecting { attempt, delay });

            tokio::select! {
                () = self.shutdown.cancelled() => {
                    tracing::info!("Stream client cancelled during reconnect delay");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            match self.establish(true).await {
                Ok(_) | Err(ClientError::Shutdown) => return,
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "Reconnect attempt failed");
                }
            }
        }
    }

    fn shutdown(&self) {
        self.shutdown.cancel();

        self.registry.lock().mark_all_wire_subscribed(false);
        let previous = std::mem::replace(&mut *self.slot.lock(), ConnectionSlot::Closed);
        if let ConnectionSlot::Open(handle) = previous {
            handle.cancel.cancel();
        }

        metrics::set_connected(false);
        tracing::info!("Stream client shut down");
    }

    // =========================================================================
    // Requests
    // =========================================================================

    fn send(&self, method: Method, channels: Vec<String>) -> bool {
        let slot = self.slot.lock();
        match &*slot {
            ConnectionSlot::Open(handle) => self.transmit(handle, method, channels),
            _ => {
                tracing::trace!(method = method.as_str(), "Connection not open, request dropped");
                false
            }
        }
    }

    fn transmit(&self, handle: &ConnectionHandle, method: Method, channels: Vec<String>) -> bool {
        if handle.is_closed() {
            return false;
        }

        let id = self.request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let text = match self.codec.encode_request(method, channels, id) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode request");
                return false;
            }
        };

        if handle.outbound.send(text).is_err() {
            return false;
        }

        metrics::record_request_sent(method.as_str());
        tracing::debug!(method = method.as_str(), id, connection_id = handle.id, "Request sent");
        true
    }

    // =========================================================================
    // References
    // =========================================================================

    fn add_reference_with<R>(
        &self,
        key: &ChannelKey,
        attach: impl FnOnce(&BroadcastHub, &str) -> R,
    ) -> (RefChange, R) {
        let mut registry = self.registry.lock();
        let change = registry.add_reference(key);
        let attached = attach(self.hub.as_ref(), change.channel());

        if let RefChange::FirstReference { channel } = &change {
            let sent = self.send(Method::Subscribe, vec![channel.clone()]);
            registry.mark_wire_subscribed(key, sent);
            tracing::info!(channel = %channel, sent, "Channel subscribed");
        }

        metrics::set_active_channels(registry.len());
        (change, attached)
    }

    fn remove_reference(&self, key: &ChannelKey) -> Result<RefChange, ClientError> {
        let mut registry = self.registry.lock();
        let change = registry.remove_reference(key)?;

        if let RefChange::LastReference { channel } = &change {
            self.hub.detach(channel);
            let sent = self.send(Method::Unsubscribe, vec![channel.clone()]);
            tracing::info!(channel = %channel, sent, "Channel unsubscribed");
        }

        metrics::set_active_channels(registry.len());
        Ok(change)
    }
}

// =============================================================================
// Connection Tasks
// =============================================================================

async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    connection_id: u64,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = outbound.recv() => {
                let Some(text) = next else { break };
                if let Err(e) = sink.send(text).await {
                    tracing::warn!(connection_id, error = %e, "Stream write failed");
                    metrics::record_transport_error("send");
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn read_loop(inner: Arc<ClientInner>, mut stream: FrameStream, handle: ConnectionHandle) {
    let reason = loop {
        tokio::select! {
            () = handle.cancel.cancelled() => break "cancelled".to_string(),
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    let _ = inner.router.route_frame(&text);
                }
                Some(Err(e)) => {
                    metrics::record_transport_error("receive");
                    break e.to_string();
                }
                None => break "end of stream".to_string(),
            }
        }
    };

    inner.on_close(&handle, &reason);
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// A consumer's reference to one channel.
///
/// Dropping the subscription releases the reference.
#[derive(Debug)]
pub struct Subscription<T: Clone> {
    key: ChannelKey,
    channel: String,
    receiver: broadcast::Receiver<T>,
    client: Weak<ClientInner>,
}

impl<T: Clone> Subscription<T> {
    fn new(key: ChannelKey, receiver: broadcast::Receiver<T>, inner: &Arc<ClientInner>) -> Self {
        Self {
            channel: key.channel_name(),
            key,
            receiver,
            client: Arc::downgrade(inner),
        }
    }

    /// Channel key of this subscription.
    #[must_use]
    pub const fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Wire channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next record.
    ///
    /// Records missed by a slow consumer are skipped. Returns `None` once
    /// the sink is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "Consumer lagged");
                    metrics::record_consumer_lagged(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next record if one is ready.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(record) => return Some(record),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    metrics::record_consumer_lagged(skipped);
                }
                Err(_) => return None,
            }
        }
    }
}

impl Subscription<OrderBookUpdate> {
    /// The latest book received on this channel.
    #[must_use]
    pub fn latest(&self) -> Option<OrderBookUpdate> {
        self.client
            .upgrade()
            .and_then(|inner| inner.hub.latest_orderbook(&self.channel))
    }
}

impl<T: Clone> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.client.upgrade()
            && let Err(e) = inner.remove_reference(&self.key)
        {
            tracing::debug!(channel = %self.channel, error = %e, "Subscription already released");
        }
    }
}
