//! Settings loading for the configuration store CLI.
//!
//! Settings come from a TOML file (`--settings`, or `go-config.toml` in the
//! current directory when present) and are then overridden from the
//! environment. Without a file the store defaults apply.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config_store::StoreSettings;
use tracing::{debug, info};

use crate::errors::Error;

/// Settings file picked up from the current directory.
pub const DEFAULT_SETTINGS_FILENAME: &str = "go-config.toml";

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Resolves the settings file to read.
///
/// An explicit path is always used. Otherwise the default file name in the
/// current directory is used when it exists.
pub fn get_settings_path(path: Option<&str>) -> Option<PathBuf> {
    match path {
        Some(p) => Some(PathBuf::from(p)),
        None => {
            let default = PathBuf::from(DEFAULT_SETTINGS_FILENAME);
            default.exists().then_some(default)
        }
    }
}

/// Loads the store settings and applies environment overrides.
///
/// # Errors
///
/// Returns `Error::Config` when an explicitly named file does not exist,
/// when the file is not valid settings TOML, or when an environment
/// override is invalid.
pub fn load_settings(path: Option<&str>) -> Result<StoreSettings, Error> {
    let settings = match get_settings_path(path) {
        Some(settings_path) => load_settings_file(&settings_path)?,
        None => {
            debug!("No settings file, using defaults");
            StoreSettings::default()
        }
    };

    let settings = settings
        .with_env_overrides()
        .map_err(|e| Error::Config(e.to_string()))?;

    info!(
        config_file = %settings.config_file().display(),
        merge_enabled = settings.config_merge_enabled,
        "Settings loaded"
    );
    Ok(settings)
}

fn load_settings_file(path: &Path) -> Result<StoreSettings, Error> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found: {:?}",
            path
        )));
    }

    StoreSettings::load(path).map_err(|e| Error::Config(e.to_string()))
}

/// Interval between reload checks for `watch`.
///
/// # Errors
///
/// Returns `Error::InvalidArguments` for an interval of zero seconds.
pub fn watch_interval(settings: &StoreSettings, seconds: Option<u64>) -> Result<Duration, Error> {
    match seconds {
        Some(0) => Err(Error::InvalidArguments(
            "--interval must be at least 1 second".to_string(),
        )),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(settings.reload_interval()),
    }
}
