//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the keys it overrides.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the relay daemon.
///
/// ```json
/// {
///   "server": { "port": 4300, "addresses": ["0.0.0.0"] },
///   "tls": { "certPath": "/etc/dcnt/cert.pem", "keyPath": "/etc/dcnt/key.pem" },
///   "relay": { "authGraceMs": 1500 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Certificate material; plaintext when absent.
    pub tls: TlsSettings,
    /// Relay behavior.
    pub relay: RelayBehaviorSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations that cannot be served.
    pub fn validate(&self) -> Result<()> {
        match (&self.tls.cert_path, &self.tls.key_path) {
            (Some(_), None) => {
                return Err(SettingsError::InvalidValue(
                    "tls.certPath is set without tls.keyPath".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(SettingsError::InvalidValue(
                    "tls.keyPath is set without tls.certPath".into(),
                ))
            }
            _ => {}
        }
        if self.relay.auth_grace_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.authGraceMs must be positive".into(),
            ));
        }
        if self.server.send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueue must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Port shared by every listener. 0 picks an ephemeral port.
    pub port: u16,
    /// IP addresses to listen on, one listener each.
    pub addresses: Vec<String>,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per session.
    pub send_queue: usize,
    /// Seconds between server pings. 0 disables pings.
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 4200,
            addresses: vec!["::1".to_string(), "127.0.0.1".to_string()],
            max_message_size: 1024 * 1024,
            send_queue: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Certificate chain and private key, both PEM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsSettings {
    /// Certificate chain path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    /// Private key path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
}

impl TlsSettings {
    /// Both paths, when TLS is configured.
    pub fn paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.cert_path.as_ref().zip(self.key_path.as_ref())
    }
}

/// Relay behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayBehaviorSettings {
    /// Milliseconds a session may stay unsubscribed before it is closed.
    pub auth_grace_ms: u64,
    /// Drop remote subscribers of a protocol when a local subscriber of it
    /// disconnects.
    pub purge_remote_on_local_disconnect: bool,
    /// Address substrings that mark a peer as local.
    pub local_hosts: Vec<String>,
}

impl RelayBehaviorSettings {
    /// Grace period as a [`Duration`].
    pub fn auth_grace(&self) -> Duration {
        Duration::from_millis(self.auth_grace_ms)
    }
}

impl Default for RelayBehaviorSettings {
    fn default() -> Self {
        Self {
            auth_grace_ms: 1000,
            purge_remote_on_local_disconnect: true,
            local_hosts: vec!["127.0.0.1".to_string()],
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level directive.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"dcnt_relay": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}
