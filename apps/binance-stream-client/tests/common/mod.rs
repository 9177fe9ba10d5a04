//! In-memory transport for driving the stream client in tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use binance_stream_client::{
    BroadcastConfig, BroadcastHub, Connector, ReconnectSettings, StaticInstrumentDictionary,
    StreamClient, StreamClientConfig, Transport, TransportError,
};
use binance_stream_client::infrastructure::binance::ReconnectConfig;

pub const TEST_URL: &str = "ws://exchange.test/stream";

/// Server end of one in-memory connection.
pub struct ServerSession {
    /// Frames written by the client.
    pub requests: futures_mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the client.
    pub frames: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ServerSession {
    /// Next request written by the client, parsed as JSON.
    pub async fn next_request(&mut self) -> serde_json::Value {
        let text = timeout(Duration::from_secs(5), self.requests.next())
            .await
            .expect("timed out waiting for request")
            .expect("client closed the connection");
        serde_json::from_str(&text).unwrap()
    }

    /// Next request as raw text.
    pub async fn next_request_text(&mut self) -> String {
        timeout(Duration::from_secs(5), self.requests.next())
            .await
            .expect("timed out waiting for request")
            .expect("client closed the connection")
    }

    /// Whether no further request arrives within a short window.
    pub async fn is_quiet(&mut self) -> bool {
        timeout(Duration::from_millis(200), self.requests.next())
            .await
            .is_err()
    }

    /// Deliver a frame to the client.
    pub fn push(&self, frame: &str) {
        self.frames.send(Ok(frame.to_string())).unwrap();
    }
}

/// Connector that hands each opened connection's server end to the test.
pub struct MockConnector {
    connects: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Duration,
    sessions: mpsc::UnboundedSender<ServerSession>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSession>) {
        Self::with_behavior(Duration::ZERO, 0)
    }

    /// Connector that waits `delay` per attempt and fails the first `failures` attempts.
    pub fn with_behavior(
        delay: Duration,
        failures: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSession>) {
        let (sessions, sessions_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            connects: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(failures),
            delay,
            sessions,
        });
        (connector, sessions_rx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        assert_eq!(url, TEST_URL);
        self.connects.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (request_tx, request_rx) = futures_mpsc::unbounded::<String>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        self.sessions
            .send(ServerSession {
                requests: request_rx,
                frames: frame_tx,
            })
            .map_err(|_| TransportError::Connect("test harness gone".to_string()))?;

        let sink = request_tx.sink_map_err(|e| TransportError::Send(e.to_string()));
        let stream = UnboundedReceiverStream::new(frame_rx);

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Client wired to a mock connector.
pub struct Harness {
    pub client: StreamClient,
    pub connector: Arc<MockConnector>,
    pub sessions: mpsc::UnboundedReceiver<ServerSession>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        let (connector, sessions) = MockConnector::new();
        Self::with_connector(connector, sessions)
    }

    pub fn with_connector(
        connector: Arc<MockConnector>,
        sessions: mpsc::UnboundedReceiver<ServerSession>,
    ) -> Self {
        Self::build(
            connector,
            sessions,
            ReconnectConfig::from_settings(&ReconnectSettings::default()),
        )
    }

    pub fn build(
        connector: Arc<MockConnector>,
        sessions: mpsc::UnboundedReceiver<ServerSession>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let mut config = StreamClientConfig::new(TEST_URL);
        config.reconnect = reconnect;

        let cancel = CancellationToken::new();
        let client = StreamClient::new(
            config,
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::new(StaticInstrumentDictionary::binance(["BTCUSDT", "ETHUSDT"])),
            Arc::new(BroadcastHub::new(BroadcastConfig::default())),
            cancel.clone(),
        );

        Self {
            client,
            connector,
            sessions,
            cancel,
        }
    }

    /// Wait for the next connection the client opens.
    pub async fn next_session(&mut self) -> ServerSession {
        timeout(Duration::from_secs(30), self.sessions.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("connector dropped")
    }
}

/// Method and channel list of a request.
pub fn method_and_params(request: &serde_json::Value) -> (String, Vec<String>) {
    let method = request["method"].as_str().unwrap().to_string();
    let params = request["params"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap().to_string())
        .collect();
    (method, params)
}

/// Request id.
pub fn request_id(request: &serde_json::Value) -> u64 {
    request["id"].as_u64().unwrap()
}
