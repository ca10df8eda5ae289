//! # dcnt-relayd
//!
//! Relay daemon: loads settings, installs logging, starts one listener per
//! configured address and serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dcnt_logging::{LogLevel, LoggingConfig};
use dcnt_server::{RelayServer, StartOutcome};
use dcnt_settings::{LoggingSettings, RelaySettings};

/// Time allowed for listeners to drain on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// dcnt signaling relay.
#[derive(Parser, Debug)]
#[command(name = "dcnt-relayd", about = "Signaling relay between local and remote peers")]
struct Cli {
    /// Settings file (default `~/.dcnt/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Port every listener binds.
    #[arg(long)]
    port: Option<u16>,

    /// Address to listen on; repeat for several.
    #[arg(long = "address", value_name = "IP")]
    addresses: Vec<String>,

    /// PEM certificate chain.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Address substring marking a peer as local; repeat for several.
    #[arg(long = "local-host", value_name = "MARKER")]
    local_hosts: Vec<String>,

    /// Milliseconds a session may stay unsubscribed.
    #[arg(long)]
    auth_grace_ms: Option<u64>,

    /// Keep remote subscriptions when a local subscriber disconnects.
    #[arg(long)]
    no_purge_cascade: bool,

    /// Default log level.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Overlay command-line flags on loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if !self.addresses.is_empty() {
            settings.server.addresses.clone_from(&self.addresses);
        }
        if self.cert.is_some() {
            settings.tls.cert_path.clone_from(&self.cert);
            settings.tls.key_path.clone_from(&self.key);
        }
        if !self.local_hosts.is_empty() {
            settings.relay.local_hosts.clone_from(&self.local_hosts);
        }
        if let Some(ms) = self.auth_grace_ms {
            settings.relay.auth_grace_ms = ms;
        }
        if self.no_purge_cascade {
            settings.relay.purge_remote_on_local_disconnect = false;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn logging_config(settings: &LoggingSettings) -> LoggingConfig {
    LoggingConfig {
        level: LogLevel::from_str_lossy(&settings.level),
        module_levels: settings
            .module_levels
            .iter()
            .map(|(module, level)| (module.clone(), LogLevel::from_str_lossy(level)))
            .collect(),
        json: settings.json,
    }
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(dcnt_settings::settings_path);
    let mut settings = dcnt_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

async fn start(settings: &RelaySettings) -> Result<RelayServer> {
    let server = RelayServer::from_settings(settings).context("Failed to configure server")?;
    let outcomes = server
        .start(&settings.server.addresses)
        .await
        .context("Failed to start listeners")?;
    for outcome in outcomes {
        if let StartOutcome::Started(addr) = outcome {
            let scheme = if server.is_tls() { "wss" } else { "ws" };
            tracing::info!("dcnt relay listening on {scheme}://{addr}");
        }
    }
    Ok(server)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    let _ = dcnt_logging::init_logging(&logging_config(&settings.logging));

    let server = start(&settings).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown_gracefully(Some(SHUTDOWN_TIMEOUT)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dcnt-relayd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_settings() {
        let cli = parse(&[
            "--port",
            "4300",
            "--address",
            "0.0.0.0",
            "--address",
            "::",
            "--local-host",
            "127.0.0.1",
            "--local-host",
            "::1",
            "--auth-grace-ms",
            "1500",
            "--no-purge-cascade",
            "--log-level",
            "debug",
            "--log-json",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);

        assert_eq!(settings.server.port, 4300);
        assert_eq!(settings.server.addresses, vec!["0.0.0.0", "::"]);
        assert_eq!(settings.relay.local_hosts, vec!["127.0.0.1", "::1"]);
        assert_eq!(settings.relay.auth_grace_ms, 1500);
        assert!(!settings.relay.purge_remote_on_local_disconnect);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn no_flags_keep_settings() {
        let mut settings = RelaySettings::default();
        parse(&[]).apply(&mut settings);
        assert_eq!(settings, RelaySettings::default());
    }

    #[test]
    fn cert_requires_key() {
        let result = Cli::try_parse_from(["dcnt-relayd", "--cert", "cert.pem"]);
        assert!(result.is_err());

        let cli = parse(&["--cert", "cert.pem", "--key", "key.pem"]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert!(settings.tls.paths().is_some());
    }

    #[test]
    fn logging_config_from_settings() {
        let settings = LoggingSettings {
            level: "warn".into(),
            module_levels: [("dcnt_relay".to_string(), "trace".to_string())].into(),
            ..LoggingSettings::default()
        };
        let config = logging_config(&settings);
        assert_eq!(config.directives(), "warn,dcnt_relay=trace");
    }

    #[test]
    fn load_reads_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4400}}"#).unwrap();

        let cli = parse(&["--settings", path.to_str().unwrap(), "--auth-grace-ms", "250"]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 4400);
        assert_eq!(settings.relay.auth_grace_ms, 250);
    }

    #[test]
    fn load_rejects_zero_grace() {
        let dir = tempfile::tempdir().unwrap();
        let cli = parse(&[
            "--settings",
            dir.path().join("missing.json").to_str().unwrap(),
            "--auth-grace-ms",
            "0",
        ]);
        assert!(load(&cli).is_err());
    }

    #[tokio::test]
    async fn starts_and_serves_health() {
        let mut settings = RelaySettings::default();
        settings.server.port = 0;
        settings.server.addresses = vec!["127.0.0.1".into()];

        let server = start(&settings).await.unwrap();
        let addr = server.listening_addresses().await[0];

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["listeners"], 1);

        server
            .shutdown_gracefully(Some(Duration::from_secs(2)))
            .await;
        assert!(!server.is_running().await);
    }
}
