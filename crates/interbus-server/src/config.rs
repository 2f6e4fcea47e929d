//! Broker configuration.

use interbus_settings::{BusSettings, ChannelSettings};
use serde::{Deserialize, Serialize};

/// Configuration for the channel broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Timeouts for handshakes accepted by the broker.
    pub channel: ChannelSettings,
}

impl ServerConfig {
    /// Build a config from loaded settings.
    pub fn from_settings(settings: &BusSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            channel: settings.channel.clone(),
            ..Self::default()
        }
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            channel: ChannelSettings::default(),
        }
    }
}
