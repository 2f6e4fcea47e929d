//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! settings file only needs the keys it wants to change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "channel": { "dispatchTimeoutMs": 10000 },
///   "server": { "port": 9797 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Channel timeouts.
    pub channel: ChannelSettings,
    /// Broker server settings.
    pub server: ServerSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl BusSettings {
    /// Reject values that would make every operation fail immediately.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("channel.dispatchTimeoutMs", self.channel.dispatch_timeout_ms),
            ("channel.connectTimeoutMs", self.channel.connect_timeout_ms),
            ("channel.disconnectTimeoutMs", self.channel.disconnect_timeout_ms),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{key} must be positive")));
            }
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Timeouts applied to channel connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// How long a dispatch waits for its correlated response.
    pub dispatch_timeout_ms: u64,
    /// How long `connect` waits for a provider and its handshake answer.
    pub connect_timeout_ms: u64,
    /// How long `disconnect` waits for the provider to acknowledge.
    pub disconnect_timeout_ms: u64,
}

impl ChannelSettings {
    /// Dispatch window as a [`Duration`].
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Connect window as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Disconnect window as a [`Duration`].
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
            disconnect_timeout_ms: 5_000,
        }
    }
}

/// Broker server settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9696,
            max_connections: 256,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
