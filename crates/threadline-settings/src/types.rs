//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a partial file only needs the keys it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub chat: ChatSettings,
    pub history: HistorySettings,
    pub share: ShareSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Reject combinations the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chat.heartbeat_secs == 0 {
            return Err(SettingsError::InvalidValue("chat.heartbeatSecs is 0".into()));
        }
        if self.history.max_limit == 0 || self.history.default_limit == 0 {
            return Err(SettingsError::InvalidValue("history limits must be positive".into()));
        }
        if self.history.default_limit > self.history.max_limit {
            return Err(SettingsError::InvalidValue(
                "history.defaultLimit exceeds history.maxLimit".into(),
            ));
        }
        if self.share.default_expiry_days <= 0
            || self.share.default_expiry_days > self.share.max_expiry_days
        {
            return Err(SettingsError::InvalidValue(
                "share.defaultExpiryDays must be within 1..=maxExpiryDays".into(),
            ));
        }
        for (module, level) in &self.logging.module_levels {
            if !is_level_name(level) {
                return Err(SettingsError::InvalidValue(format!(
                    "logging.moduleLevels.{module} has unknown level {level:?}"
                )));
            }
        }
        Ok(())
    }
}

fn is_level_name(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    )
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite file; relative paths resolve against `~/.threadline`.
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "threadline.db".to_string(),
        }
    }
}

/// Chat submission and streaming.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Name reported by the built-in agent.
    pub agent_name: String,
    pub heartbeat_secs: u64,
    pub max_attachments: usize,
    pub max_image_bytes: usize,
    pub max_pdf_bytes: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            agent_name: "assistant".to_string(),
            heartbeat_secs: 30,
            max_attachments: 4,
            max_image_bytes: 5 * 1024 * 1024,
            max_pdf_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShareSettings {
    pub default_expiry_days: i64,
    pub max_expiry_days: i64,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            default_expiry_days: 7,
            max_expiry_days: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` still wins.
    pub level: String,
    pub json: bool,
    /// Per-target levels, e.g. `{"threadline_store": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            module_levels: BTreeMap::new(),
        }
    }
}
