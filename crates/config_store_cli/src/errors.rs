use std::io;

use config_store::ConfigStoreError;
use thiserror::Error;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Errors that can occur in the configuration store CLI.
///
/// Store failures keep their own variant so the exit code can tell a
/// rejected edit apart from a broken installation.
#[derive(Error, Debug)]
pub enum Error {
    /// The CLI settings could not be loaded.
    ///
    /// Returned when the settings file is missing or unreadable, or when an
    /// environment override has an invalid value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid command-line arguments were provided.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Failed to read an input file given on the command line.
    #[error("Failed to load file {path}: {source}")]
    LoadFile { path: String, source: io::Error },

    /// Failed to render command output.
    #[error("Failed to render output: {0}")]
    Output(String),

    /// The configuration store rejected the operation.
    #[error(transparent)]
    Store(#[from] ConfigStoreError),
}

impl Error {
    /// Process exit code for this error.
    ///
    /// Rejected configuration and concurrent modification exit with 2 so
    /// scripts can retry or report; everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Store(e) if e.is_conflict() || e.is_invalid_config() => 2,
            _ => 1,
        }
    }
}
