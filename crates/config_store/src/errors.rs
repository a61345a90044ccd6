//! Configuration store error types.
//!
//! Every failure of a load or a write is reported through
//! [`ConfigStoreError`]. A failed write never leaves intermediate state
//! behind: the backing file, the versioned history and the published
//! snapshot are all untouched.

use thiserror::Error;

use crate::validator::ValidationError;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Message returned when a write is based on a configuration that has
/// since been changed and merging is not possible.
pub const CONFIG_CHANGED_PLEASE_REFRESH: &str =
    "Configuration file has been changed by someone else. Please refresh and try again.";

/// Configuration store errors.
///
/// The variants follow the failure taxonomy of the store:
///
/// - parse and schema errors (`Parse`, `UnsupportedSchemaVersion`, `MigrationFailed`)
/// - validation errors (`ValidationFailed`)
/// - concurrent modification (`ConfigChanged`, `MergeConflict`)
/// - systemic failures (`Repository`, `Io`)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigStoreError {
    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Unsupported schema version {found}. This server supports schema version {current}")]
    UnsupportedSchemaVersion { found: i64, current: u32 },

    #[error("Failed to migrate configuration from schema version {from} to {to}: {reason}")]
    MigrationFailed { from: u32, to: u32, reason: String },

    #[error("Failed to serialize configuration: {reason}")]
    Serialization { reason: String },

    #[error("Configuration validation failed: {summary}")]
    ValidationFailed {
        summary: String,
        errors: Vec<ValidationError>,
    },

    #[error("Configuration file has been changed by someone else. Please refresh and try again.")]
    ConfigChanged,

    #[error("Configuration merge conflict on {element}: {reason}")]
    MergeConflict { element: String, reason: String },

    #[error("Configuration has not been loaded from {path}")]
    NotLoaded { path: String },

    #[error("No configuration revision found with md5 '{md5}'")]
    RevisionNotFound { md5: String },

    #[error("Config repository operation '{operation}' failed: {reason}")]
    Repository { operation: String, reason: String },

    #[error("Failed to access configuration file: {path} - {reason}")]
    Io { path: String, reason: String },

    #[error("Update command failed: {reason}")]
    CommandFailed { reason: String },

    #[error("Invalid store settings: {reason}")]
    Settings { reason: String },
}

impl ConfigStoreError {
    /// Returns `true` for errors a caller should answer with
    /// refresh-and-retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ConfigStoreError::ConfigChanged | ConfigStoreError::MergeConflict { .. }
        )
    }

    /// Returns `true` for parse, schema and validation errors.
    pub fn is_invalid_config(&self) -> bool {
        matches!(
            self,
            ConfigStoreError::Parse { .. }
                | ConfigStoreError::UnsupportedSchemaVersion { .. }
                | ConfigStoreError::MigrationFailed { .. }
                | ConfigStoreError::ValidationFailed { .. }
        )
    }

    pub(crate) fn io(path: &std::path::Path, error: std::io::Error) -> Self {
        ConfigStoreError::Io {
            path: path.display().to_string(),
            reason: error.to_string(),
        }
    }
}

/// Result type alias for configuration store operations.
pub type ConfigStoreResult<T> = Result<T, ConfigStoreError>;
