//! Settings of the configuration store itself.
//!
//! Settings are read from an optional TOML file and then overridden from
//! the environment:
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `GO_CONFIG_DIR` | `config_dir` |
//! | `GO_CONFIG_MERGE_ENABLED` | `config_merge_enabled` |
//! | `GO_CONFIG_RELOAD_INTERVAL_SECS` | `reload_interval_secs` |
//!
//! # Example TOML
//!
//! ```toml
//! config_dir = "/etc/go"
//! config_merge_enabled = true
//! reload_interval_secs = 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{ConfigStoreError, ConfigStoreResult};
use crate::model::CONFIG_FILE_NAME;

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;

pub const ENV_CONFIG_DIR: &str = "GO_CONFIG_DIR";
pub const ENV_CONFIG_MERGE_ENABLED: &str = "GO_CONFIG_MERGE_ENABLED";
pub const ENV_RELOAD_INTERVAL_SECS: &str = "GO_CONFIG_RELOAD_INTERVAL_SECS";

/// Directory name of the history repository inside `config_dir`.
pub const DEFAULT_HISTORY_DIR_NAME: &str = "config.git";

/// Settings of a configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Directory holding the configuration document.
    pub config_dir: PathBuf,

    pub config_file_name: String,

    /// History repository location; defaults to `<config_dir>/config.git`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_repo_dir: Option<PathBuf>,

    /// Whether stale edits are three-way merged instead of rejected.
    pub config_merge_enabled: bool,

    pub reload_interval_secs: u64,

    /// Server version recorded with every saved revision.
    pub server_version: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            config_file_name: CONFIG_FILE_NAME.to_string(),
            config_repo_dir: None,
            config_merge_enabled: true,
            reload_interval_secs: 5,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl StoreSettings {
    /// Default settings rooted at `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Self::default()
        }
    }

    /// Loads settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigStoreError::Io` when the file cannot be read and
    /// `ConfigStoreError::Settings` when it is not valid settings TOML.
    pub fn load(path: &Path) -> ConfigStoreResult<Self> {
        debug!("Loading store settings from {:?}", path);

        let content = fs::read_to_string(path).map_err(|e| ConfigStoreError::io(path, e))?;
        let settings: StoreSettings =
            toml::from_str(&content).map_err(|e| ConfigStoreError::Settings {
                reason: format!("{}: {}", path.display(), e.message()),
            })?;

        info!(config_dir = %settings.config_dir.display(), "Store settings loaded");
        Ok(settings)
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> ConfigStoreResult<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigStoreResult<Self> {
        if let Some(dir) = lookup(ENV_CONFIG_DIR) {
            debug!(config_dir = %dir, "Config directory overridden from environment");
            self.config_dir = PathBuf::from(dir);
        }

        if let Some(value) = lookup(ENV_CONFIG_MERGE_ENABLED) {
            self.config_merge_enabled = parse_bool(ENV_CONFIG_MERGE_ENABLED, &value)?;
        }

        if let Some(value) = lookup(ENV_RELOAD_INTERVAL_SECS) {
            self.reload_interval_secs =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigStoreError::Settings {
                        reason: format!(
                            "{ENV_RELOAD_INTERVAL_SECS} must be a whole number of seconds, got '{value}'"
                        ),
                    })?;
        }

        Ok(self)
    }

    /// Path of the configuration document.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(&self.config_file_name)
    }

    /// Path of the history repository.
    pub fn history_dir(&self) -> PathBuf {
        self.config_repo_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join(DEFAULT_HISTORY_DIR_NAME))
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs.max(1))
    }
}

fn parse_bool(name: &str, value: &str) -> ConfigStoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigStoreError::Settings {
            reason: format!("{name} must be true or false, got '{value}'"),
        }),
    }
}

/// Runtime view of the settings the data source consults on every write.
pub trait SettingsProvider: Send + Sync {
    fn is_config_merge_enabled(&self) -> bool;

    /// Server version recorded with saved revisions.
    fn server_version(&self) -> String;
}

impl SettingsProvider for StoreSettings {
    fn is_config_merge_enabled(&self) -> bool {
        self.config_merge_enabled
    }

    fn server_version(&self) -> String {
        self.server_version.clone()
    }
}

/// Settings whose merge flag can be toggled while the store is running.
#[derive(Debug)]
pub struct RuntimeSettings {
    merge_enabled: AtomicBool,
    server_version: String,
}

impl RuntimeSettings {
    pub fn new(settings: &StoreSettings) -> Self {
        Self {
            merge_enabled: AtomicBool::new(settings.config_merge_enabled),
            server_version: settings.server_version.clone(),
        }
    }

    pub fn set_config_merge_enabled(&self, enabled: bool) {
        info!(enabled, "Configuration merge setting changed");
        self.merge_enabled.store(enabled, Ordering::SeqCst);
    }
}

impl SettingsProvider for RuntimeSettings {
    fn is_config_merge_enabled(&self) -> bool {
        self.merge_enabled.load(Ordering::SeqCst)
    }

    fn server_version(&self) -> String {
        self.server_version.clone()
    }
}

/// Identity of the user of the current session.
pub trait UserProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// A fixed session user.
#[derive(Debug, Clone, Default)]
pub struct StaticUserProvider {
    username: Option<String>,
}

impl StaticUserProvider {
    pub fn new(username: &str) -> Self {
        Self {
            username: Some(username.to_string()),
        }
    }

    /// A provider without a session user.
    pub fn none() -> Self {
        Self::default()
    }
}

impl UserProvider for StaticUserProvider {
    fn current_user(&self) -> Option<String> {
        self.username.clone()
    }
}
