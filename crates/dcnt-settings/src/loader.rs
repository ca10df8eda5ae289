//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `DCNT_*` environment overrides (highest priority)
//! 4. [`RelaySettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the path to the settings file (`~/.dcnt/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dcnt").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final
/// combination is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides_from(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `DCNT_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `DCNT_*` overrides read through `env`.
///
/// Empty and unparsable values are ignored with a warning.
pub fn apply_env_overrides_from(settings: &mut RelaySettings, env: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = read("DCNT_PORT") {
        match v.trim().parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => warn!(key = "DCNT_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("DCNT_ADDRESSES") {
        let addresses = parse_list(&v);
        if addresses.is_empty() {
            warn!(key = "DCNT_ADDRESSES", value = %v, "empty address list env var, ignoring");
        } else {
            settings.server.addresses = addresses;
        }
    }
    if let Some(v) = read("DCNT_CERT") {
        settings.tls.cert_path = Some(PathBuf::from(v));
    }
    if let Some(v) = read("DCNT_KEY") {
        settings.tls.key_path = Some(PathBuf::from(v));
    }
    if let Some(v) = read("DCNT_AUTH_GRACE_MS") {
        match parse_u64_range(&v, 1, 600_000) {
            Some(ms) => settings.relay.auth_grace_ms = ms,
            None => warn!(key = "DCNT_AUTH_GRACE_MS", value = %v, "invalid grace env var, ignoring"),
        }
    }
    if let Some(v) = read("DCNT_PURGE_CASCADE") {
        match parse_bool(&v) {
            Some(b) => settings.relay.purge_remote_on_local_disconnect = b,
            None => warn!(key = "DCNT_PURGE_CASCADE", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = read("DCNT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("DCNT_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "DCNT_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
