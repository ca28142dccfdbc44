//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `SWOOSH_*` environment variable overrides (highest priority)
//! 4. Validate the result
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

/// Resolve the path to the settings file (`~/.swoosh/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".swoosh").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed validation is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<RelaySettings> {
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

    Ok(serde_json::from_value(merged)?)
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

/// Apply environment variable overrides to loaded settings.
///
/// Out-of-range or unparsable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (env vars in production, a map in tests).
fn apply_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("SWOOSH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("SWOOSH_PORT").and_then(|v| parse_range("SWOOSH_PORT", &v, 0u16, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = read("SWOOSH_MAX_CONNECTIONS")
        .and_then(|v| parse_range("SWOOSH_MAX_CONNECTIONS", &v, 1usize, 1_000_000))
    {
        settings.limits.max_connections = v;
    }
    if let Some(v) = read("SWOOSH_MAX_CONNECTIONS_PER_WORKFLOW")
        .and_then(|v| parse_range("SWOOSH_MAX_CONNECTIONS_PER_WORKFLOW", &v, 1usize, 100_000))
    {
        settings.limits.max_connections_per_workflow = v;
    }
    if let Some(v) = read("SWOOSH_HEARTBEAT_INTERVAL_SECS")
        .and_then(|v| parse_range("SWOOSH_HEARTBEAT_INTERVAL_SECS", &v, 1u64, 3_600))
    {
        settings.heartbeat.interval_secs = v;
    }
    if let Some(v) = read("SWOOSH_HEARTBEAT_TIMEOUT_SECS")
        .and_then(|v| parse_range("SWOOSH_HEARTBEAT_TIMEOUT_SECS", &v, 1u64, 7_200))
    {
        settings.heartbeat.timeout_secs = v;
    }
    if let Some(v) = read("SWOOSH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("SWOOSH_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "SWOOSH_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_range<T>(key: &str, val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let parsed = val.parse::<T>().ok().filter(|n| *n >= min && *n <= max);
    if parsed.is_none() {
        warn!(key, value = %val, "invalid numeric env var, ignoring");
    }
    parsed
}
