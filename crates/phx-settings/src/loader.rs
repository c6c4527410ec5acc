//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SocketSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PHX_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SocketSettings;

/// Resolve the settings file path.
///
/// `PHX_SETTINGS_PATH` wins; otherwise `~/.phx/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os("PHX_SETTINGS_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".phx").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SocketSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<SocketSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<SocketSettings> {
    let defaults = serde_json::to_value(SocketSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading socket settings from file");
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

/// Apply `PHX_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut SocketSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("PHX_ENDPOINT").filter(|v| !v.is_empty()) {
        settings.endpoint = v;
    }
    if let Some(v) = read_u64(&lookup, "PHX_HEARTBEAT_INTERVAL_MS", 100, 3_600_000) {
        settings.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_u64(&lookup, "PHX_RECONNECT_INTERVAL_MS", 100, 3_600_000) {
        settings.reconnect_interval_ms = v;
    }
    if let Some(v) = read_u64(&lookup, "PHX_TIMEOUT_MS", 1, 3_600_000) {
        settings.default_timeout_ms = v;
    }
    if let Some(v) = lookup("PHX_RECONNECT") {
        match parse_bool(&v) {
            Some(b) => settings.reconnect_on_failure = b,
            None => tracing::warn!(key = "PHX_RECONNECT", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = lookup("PHX_SEND_BUFFER") {
        match parse_usize_range(&v, 1, 1_000_000) {
            Some(n) => settings.send_buffer_capacity = n,
            None => tracing::warn!(key = "PHX_SEND_BUFFER", value = %v, "invalid usize env var, ignoring"),
        }
    }
}

fn read_u64<F>(lookup: &F, name: &str, min: u64, max: u64) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
