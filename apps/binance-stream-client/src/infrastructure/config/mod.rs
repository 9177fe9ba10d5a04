//! Configuration Module
//!
//! Configuration loading for the stream client.

mod settings;

pub use settings::{
    BroadcastSettings, ClientConfig, ConfigError, DEFAULT_BASE_URL, ReconnectSettings,
    STREAM_PATH, ServerSettings, StreamSettings,
};
