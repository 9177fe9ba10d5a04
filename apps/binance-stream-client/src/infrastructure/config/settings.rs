//! Client Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment
//! variables. Unset or unparsable numeric values fall back to defaults;
//! values that cannot be defaulted (base URL, order book interval) are
//! validated and reported as `ConfigError`.

use std::time::Duration;

use url::Url;

use crate::domain::channel::{ChannelError, ChannelParams};
use crate::infrastructure::binance::reconnect::MIN_RECONNECT_DELAY;

/// Default combined stream base URL.
pub const DEFAULT_BASE_URL: &str = "wss://stream.binance.com:9443/";

/// Path joined onto the base URL for the combined stream endpoint.
pub const STREAM_PATH: &str = "stream";

/// Stream endpoint and channel settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Base URL of the exchange's WebSocket API.
    pub base_url: String,
    /// Order book update interval in milliseconds (100 or 1000).
    pub orderbook_interval_ms: u32,
    /// Subscribe to aggregated trades instead of raw trades.
    pub show_agg_trades: bool,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Symbols the binary subscribes to.
    pub symbols: Vec<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            orderbook_interval_ms: 100,
            show_agg_trades: false,
            connect_timeout: Duration::from_secs(10),
            symbols: vec!["BTCUSDT".to_string()],
        }
    }
}

impl StreamSettings {
    /// Combined stream URL: the base URL joined with `stream`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUrl` if the base URL cannot be joined.
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(STREAM_PATH))
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.base_url)))
    }

    /// Order book channel parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured interval is not supported.
    pub fn orderbook_params(&self) -> Result<ChannelParams, ConfigError> {
        Ok(ChannelParams::orderbook(self.orderbook_interval_ms)?)
    }

    /// Trade channel parameters.
    #[must_use]
    pub const fn trade_params(&self) -> ChannelParams {
        ChannelParams::Trades {
            aggregated: self.show_agg_trades,
        }
    }
}

/// Reconnection settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Delay before reconnecting after an unplanned close (at least 1000 ms).
    pub timeout: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier (1.0 = fixed delay).
    pub delay_multiplier: f64,
    /// Jitter factor as a fraction of the delay.
    pub jitter_factor: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            timeout: MIN_RECONNECT_DELAY,
            delay_max: Duration::from_secs(30),
            delay_multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0, // Unlimited
        }
    }
}

/// Sink capacity settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Capacity of each order book sink.
    pub orderbook_capacity: usize,
    /// Capacity of each trade sink.
    pub trades_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            orderbook_capacity: 1_024,
            trades_capacity: 4_096,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Stream endpoint and channel settings.
    pub stream: StreamSettings,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Sink capacities.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or order book interval is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or order book interval is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let stream_defaults = StreamSettings::default();
        let reconnect_defaults = ReconnectSettings::default();
        let broadcast_defaults = BroadcastSettings::default();

        let base_url = lookup("BINANCE_WS_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| stream_defaults.base_url.clone());

        let symbols = lookup("BINANCE_SYMBOLS")
            .map(|v| parse_symbols(&v))
            .filter(|symbols| !symbols.is_empty())
            .unwrap_or_else(|| stream_defaults.symbols.clone());

        let stream = StreamSettings {
            base_url,
            orderbook_interval_ms: parse_env_u32(
                &lookup,
                "BINANCE_ORDERBOOK_UPDATE_INTERVAL_MS",
                stream_defaults.orderbook_interval_ms,
            ),
            show_agg_trades: parse_env_bool(
                &lookup,
                "BINANCE_SHOW_AGG_TRADES",
                stream_defaults.show_agg_trades,
            ),
            connect_timeout: parse_env_duration_secs(
                &lookup,
                "BINANCE_CONNECT_TIMEOUT_SECS",
                stream_defaults.connect_timeout,
            ),
            symbols,
        };
        stream.orderbook_params()?;
        stream.stream_url()?;

        let reconnect = ReconnectSettings {
            timeout: parse_env_duration_millis(
                &lookup,
                "BINANCE_RECONNECT_TIMEOUT_MS",
                reconnect_defaults.timeout,
            )
            .max(MIN_RECONNECT_DELAY),
            delay_max: parse_env_duration_secs(
                &lookup,
                "BINANCE_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.delay_max,
            ),
            delay_multiplier: parse_env_f64(
                &lookup,
                "BINANCE_RECONNECT_DELAY_MULTIPLIER",
                reconnect_defaults.delay_multiplier,
            ),
            jitter_factor: parse_env_f64(
                &lookup,
                "BINANCE_RECONNECT_JITTER_FACTOR",
                reconnect_defaults.jitter_factor,
            )
            .clamp(0.0, 1.0),
            max_attempts: parse_env_u32(
                &lookup,
                "BINANCE_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
        };

        let broadcast = BroadcastSettings {
            orderbook_capacity: parse_env_usize(
                &lookup,
                "STREAM_ORDERBOOK_CAPACITY",
                broadcast_defaults.orderbook_capacity,
            )
            .max(1),
            trades_capacity: parse_env_usize(
                &lookup,
                "STREAM_TRADES_CAPACITY",
                broadcast_defaults.trades_capacity,
            )
            .max(1),
        };

        let server = ServerSettings {
            health_port: parse_env_u16(
                &lookup,
                "STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            stream,
            reconnect,
            broadcast,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The base URL is not a valid WebSocket base.
    #[error("invalid stream URL: {0}")]
    InvalidUrl(String),
    /// A channel parameter is not supported by the exchange.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn parse_env_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| {
        matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

fn parse_env_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.stream.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.stream.orderbook_interval_ms, 100);
        assert!(!config.stream.show_agg_trades);
        assert_eq!(config.stream.symbols, vec!["BTCUSDT".to_string()]);
        assert_eq!(config.reconnect.timeout, Duration::from_millis(1000));
        assert_eq!(config.broadcast.orderbook_capacity, 1_024);
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn stream_url_joins_stream_path() {
        let config = config_from(&[]).unwrap();
        assert_eq!(
            config.stream.stream_url().unwrap().as_str(),
            "wss://stream.binance.com:9443/stream"
        );
    }

    #[test]
    fn custom_base_url() {
        let config = config_from(&[("BINANCE_WS_URL", "wss://testnet.binance.vision/")]).unwrap();
        assert_eq!(
            config.stream.stream_url().unwrap().as_str(),
            "wss://testnet.binance.vision/stream"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            config_from(&[("BINANCE_WS_URL", "not a url")]),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn unsupported_interval_is_rejected() {
        assert!(matches!(
            config_from(&[("BINANCE_ORDERBOOK_UPDATE_INTERVAL_MS", "250")]),
            Err(ConfigError::Channel(ChannelError::UnsupportedInterval(250)))
        ));
    }

    #[test]
    fn reconnect_timeout_is_clamped_to_floor() {
        let config = config_from(&[("BINANCE_RECONNECT_TIMEOUT_MS", "10")]).unwrap();
        assert_eq!(config.reconnect.timeout, MIN_RECONNECT_DELAY);

        let config = config_from(&[("BINANCE_RECONNECT_TIMEOUT_MS", "2500")]).unwrap();
        assert_eq!(config.reconnect.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn jitter_factor_is_clamped_to_unit_range() {
        let config = config_from(&[("BINANCE_RECONNECT_JITTER_FACTOR", "1e308")]).unwrap();
        assert!((config.reconnect.jitter_factor - 1.0).abs() < f64::EPSILON);

        let config = config_from(&[("BINANCE_RECONNECT_JITTER_FACTOR", "-0.5")]).unwrap();
        assert!(config.reconnect.jitter_factor.abs() < f64::EPSILON);

        let config = config_from(&[("BINANCE_RECONNECT_JITTER_FACTOR", "0.25")]).unwrap();
        assert!((config.reconnect.jitter_factor - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn agg_trades_flag_selects_trade_params() {
        let config = config_from(&[("BINANCE_SHOW_AGG_TRADES", "true")]).unwrap();
        assert_eq!(config.stream.trade_params(), ChannelParams::Trades {
            aggregated: true
        });

        let config = config_from(&[("BINANCE_SHOW_AGG_TRADES", "0")]).unwrap();
        assert!(!config.stream.show_agg_trades);
    }

    #[test]
    fn symbols_are_split_and_upper_cased() {
        let config = config_from(&[("BINANCE_SYMBOLS", "btcusdt, ethusdt,,BNBUSDT")]).unwrap();
        assert_eq!(config.stream.symbols, vec![
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
            "BNBUSDT".to_string()
        ]);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("STREAM_HEALTH_PORT", "abc"),
            ("BINANCE_RECONNECT_DELAY_MULTIPLIER", "NaN"),
            ("STREAM_TRADES_CAPACITY", "-1"),
        ])
        .unwrap();

        assert_eq!(config.server.health_port, 8083);
        assert!((config.reconnect.delay_multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.broadcast.trades_capacity, 4_096);
    }
}
