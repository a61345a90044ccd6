use std::fs;
use std::path::Path;

use clap::Subcommand;
use config_store::{
    load_document, serialize, ConfigDataSource, ConfigSaveState, ConfigValidator, StoreSettings,
};
use tracing::{debug, info, instrument};

use crate::commands::open_store;
use crate::errors::Error;

#[cfg(test)]
#[path = "store_cmd_tests.rs"]
mod tests;

/// Commands that read or change the current configuration
#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Print the current configuration
    Show {
        /// Include pipelines contributed by config repositories
        #[arg(long)]
        effective: bool,
    },

    /// Check a configuration file without saving it
    Validate {
        /// Path to the configuration document
        file: String,
    },

    /// Save a configuration document as the new configuration
    Write {
        /// Path to the configuration document
        file: String,

        /// Replace the latest configuration instead of merging with it
        #[arg(long)]
        bypass_merge: bool,

        /// User recorded in the history
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Load the configuration file, recording edits made directly to it
    Load,
}

/// Execute a store command and return its output
#[instrument(skip(settings))]
pub fn execute(cmd: &StoreCommands, settings: &StoreSettings) -> Result<String, Error> {
    match cmd {
        StoreCommands::Show { effective } => show(&open_store(settings, None)?, *effective),
        StoreCommands::Validate { file } => validate_file(Path::new(file)),
        StoreCommands::Write {
            file,
            bypass_merge,
            user,
        } => write_file(
            &open_store(settings, user.as_deref())?,
            Path::new(file),
            *bypass_merge,
        ),
        StoreCommands::Load => Ok(load(&open_store(settings, None)?)),
    }
}

/// Renders the current configuration as a TOML document.
pub fn show(source: &ConfigDataSource, effective: bool) -> Result<String, Error> {
    let holder = source
        .current()
        .ok_or_else(|| Error::Output("configuration is not loaded".to_string()))?;

    let config = if effective {
        &holder.config
    } else {
        &holder.config_for_edit
    };
    let body = serialize(config)?;

    Ok(format!("# md5: {}\n{}", holder.md5, body))
}

/// Parses and validates a configuration document without saving it.
#[instrument]
pub fn validate_file(path: &Path) -> Result<String, Error> {
    let content = read_input(path)?;
    let parsed = load_document(&content)?;

    let result = ConfigValidator::new().validate(&parsed.config);
    let warnings: Vec<String> = result
        .warnings
        .iter()
        .map(|w| format!("warning: {}", w.message))
        .collect();
    result.into_result()?;

    let mut output = String::from("Configuration is valid");
    if parsed.was_migrated() {
        output.push_str(&format!(
            " (schema version {} will be upgraded)",
            parsed.source_schema_version
        ));
    }
    for warning in warnings {
        output.push('\n');
        output.push_str(&warning);
    }

    info!(path = ?path, "Configuration file is valid");
    Ok(output)
}

/// Saves the document at `path` as the new configuration.
#[instrument(skip(source))]
pub fn write_file(
    source: &ConfigDataSource,
    path: &Path,
    bypass_merge: bool,
) -> Result<String, Error> {
    let content = read_input(path)?;
    let result = source.write(&content, bypass_merge)?;

    let state = match result.state {
        ConfigSaveState::Updated => "updated",
        ConfigSaveState::Merged => "merged",
    };
    Ok(format!(
        "Configuration {} (md5 {})",
        state, result.holder.md5
    ))
}

/// Reports the configuration as loaded from the file.
pub fn load(source: &ConfigDataSource) -> String {
    match source.current() {
        Some(holder) => format!(
            "Configuration loaded (md5 {}, {} pipelines)",
            holder.md5,
            holder.config.all_pipelines().count()
        ),
        None => "Configuration is not loaded".to_string(),
    }
}

fn read_input(path: &Path) -> Result<String, Error> {
    debug!(path = ?path, "Reading configuration document");
    fs::read_to_string(path).map_err(|source| Error::LoadFile {
        path: path.display().to_string(),
        source,
    })
}
