//! Binance Stream Client Binary
//!
//! Streams order books and trades for the configured symbols and logs them.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin binance-stream-client
//! ```
//!
//! # Environment Variables
//!
//! - `BINANCE_SYMBOLS`: Comma-separated symbols (default: BTCUSDT)
//! - `BINANCE_WS_URL`: Base URL (default: <wss://stream.binance.com:9443/>)
//! - `BINANCE_ORDERBOOK_UPDATE_INTERVAL_MS`: 100 | 1000 (default: 100)
//! - `BINANCE_SHOW_AGG_TRADES`: Use aggregated trades (default: false)
//! - `BINANCE_RECONNECT_TIMEOUT_MS`: Reconnect delay, at least 1000 (default: 1000)
//! - `STREAM_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use binance_stream_client::infrastructure::telemetry;
use binance_stream_client::{
    BroadcastConfig, BroadcastHub, ClientConfig, ConnectionEvent, HealthServer,
    HealthServerState, Instrument, OrderBookUpdate, StaticInstrumentDictionary, StreamClient,
    StreamClientConfig, Subscription, TradePrint, WebSocketConnector, init_metrics,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Binance Stream Client");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = ClientConfig::from_env()?;
    let client_config = StreamClientConfig::from_client_config(&config)?;
    log_config(&config, &client_config);

    let shutdown_token = CancellationToken::new();

    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(config.broadcast)));
    let dictionary = Arc::new(StaticInstrumentDictionary::binance(
        config.stream.symbols.iter().cloned(),
    ));

    let client = StreamClient::new(
        client_config,
        Arc::new(WebSocketConnector::new()),
        dictionary,
        Arc::clone(&broadcast_hub),
        shutdown_token.child_token(),
    );

    tokio::spawn(log_events(client.clone(), shutdown_token.clone()));

    // Spawn health server
    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            client.clone(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let mut consumers = Vec::with_capacity(config.stream.symbols.len() * 2);
    for symbol in &config.stream.symbols {
        let instrument = Instrument::binance(symbol);
        let books = client.subscribe_orderbook(&instrument).await?;
        let trades = client.subscribe_trades(&instrument).await?;
        consumers.push(spawn_orderbook_logger(books, shutdown_token.clone()));
        consumers.push(spawn_trade_logger(trades, shutdown_token.clone()));
    }

    tracing::info!(symbols = config.stream.symbols.len(), "Stream client ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(consumers))
        .await
        .is_err()
    {
        tracing::warn!("Consumers did not stop before the shutdown timeout");
    }
    client.shutdown();

    tracing::info!("Stream client stopped");
    Ok(())
}

/// Log order book snapshots until shutdown.
fn spawn_orderbook_logger(
    mut subscription: Subscription<OrderBookUpdate>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                update = subscription.recv() => {
                    let Some(update) = update else { break };
                    tracing::info!(
                        symbol = %update.instrument.symbol,
                        bids = update.book.bids.len(),
                        asks = update.book.asks.len(),
                        best_bid = ?update.book.best_bid().map(|level| level.price),
                        best_ask = ?update.book.best_ask().map(|level| level.price),
                        "Order book"
                    );
                }
            }
        }
    })
}

/// Log trade prints until shutdown.
fn spawn_trade_logger(
    mut subscription: Subscription<TradePrint>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                print = subscription.recv() => {
                    let Some(print) = print else { break };
                    tracing::info!(
                        symbol = %print.symbol,
                        side = print.side.as_str(),
                        price = print.price,
                        volume = print.volume,
                        order_id = print.order_id,
                        "Trade"
                    );
                }
            }
        }
    })
}

/// Log connection lifecycle events.
async fn log_events(client: StreamClient, cancel: CancellationToken) {
    let mut events = client.events();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(ConnectionEvent::Resubscribed { channels }) => {
                    tracing::info!(channels, "Channels resubscribed");
                }
                Ok(ConnectionEvent::ReconnectFailed { attempts }) => {
                    tracing::error!(attempts, "Stream reconnection abandoned");
                }
                Ok(event) => tracing::debug!(?event, "Connection event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig, client_config: &StreamClientConfig) {
    tracing::info!(
        url = %client_config.url,
        symbols = ?config.stream.symbols,
        orderbook_interval_ms = config.stream.orderbook_interval_ms,
        agg_trades = config.stream.show_agg_trades,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        reconnect_initial_ms = u64::try_from(client_config.reconnect.initial_delay.as_millis())
            .unwrap_or(u64::MAX),
        reconnect_max_secs = client_config.reconnect.max_delay.as_secs(),
        max_attempts = client_config.reconnect.max_attempts,
        "Reconnect policy"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
