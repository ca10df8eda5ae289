//! Server configuration.

use std::time::Duration;

use dcnt_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration shared by every listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port every listener binds (`0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per session.
    pub send_queue: usize,
    /// Seconds between server pings; `0` disables them.
    pub heartbeat_interval_secs: u64,
    /// Seconds a TLS handshake may take before the socket is dropped.
    pub handshake_timeout_secs: u64,
}

impl ServerConfig {
    /// Ping period, if enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    /// TLS handshake deadline.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            max_message_size: 1024 * 1024,
            send_queue: 256,
            heartbeat_interval_secs: 30,
            handshake_timeout_secs: 10,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            port: settings.port,
            max_message_size: settings.max_message_size,
            send_queue: settings.send_queue.max(1),
            heartbeat_interval_secs: settings.heartbeat_interval_secs,
            ..Self::default()
        }
    }
}
