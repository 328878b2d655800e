//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::Settings;

/// Directory holding the settings file and, by default, the database.
pub fn base_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".threadline")
}

/// `~/.threadline/settings.json`
pub fn settings_path() -> PathBuf {
    base_dir().join("settings.json")
}

/// Resolve the configured database path against [`base_dir`].
pub fn database_path(settings: &Settings) -> PathBuf {
    let configured = PathBuf::from(&settings.storage.database_path);
    if configured.is_absolute() {
        configured
    } else {
        base_dir().join(configured)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

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

/// Apply `THREADLINE_*` environment variables.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Invalid values are logged and
/// ignored so a typo in one variable never blocks startup.
pub fn apply_overrides(settings: &mut Settings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("THREADLINE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("THREADLINE_PORT", 1, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("THREADLINE_DB") {
        settings.storage.database_path = v;
    }
    if let Some(v) = env.u64_in("THREADLINE_HEARTBEAT_SECS", 1, 3_600) {
        settings.chat.heartbeat_secs = v;
    }
    if let Some(v) = env.u64_in("THREADLINE_HISTORY_MAX_LIMIT", 1, 1_000) {
        settings.history.max_limit = v as usize;
    }
    if let Some(v) = env.string("THREADLINE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("THREADLINE_LOG_JSON") {
        settings.logging.json = v;
    }
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
