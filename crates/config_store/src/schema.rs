//! Parsing, canonical serialization and content addressing of
//! configuration documents.
//!
//! # Data Flow
//! ```text
//! document text
//!     → prolog check (is this a document at all?)
//!     → TOML table
//!     → schema version check
//!     → migration.rs (step-wise upgrade to the current version)
//!     → CruiseConfig
//! ```
//!
//! The functions here are pure: they never touch the file system or the
//! versioned history.

use md5::{Digest, Md5};
use tracing::debug;

use crate::errors::{ConfigStoreError, ConfigStoreResult};
use crate::migration;
use crate::model::{CruiseConfig, CURRENT_SCHEMA_VERSION};

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;

/// Key holding the schema version of a document.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// A parsed document together with the schema version it was written in.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub config: CruiseConfig,
    pub source_schema_version: u32,
}

impl ParsedDocument {
    /// Whether the text had to be upgraded to the current schema version.
    pub fn was_migrated(&self) -> bool {
        self.source_schema_version != CURRENT_SCHEMA_VERSION
    }
}

/// The canonical serialized form of a document and its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDocument {
    pub content: String,
    pub md5: String,
}

/// Parses a document, migrating it to the current schema version.
pub fn parse_document(text: &str) -> ConfigStoreResult<CruiseConfig> {
    load_document(text).map(|parsed| parsed.config)
}

/// Parses a document and reports the schema version it was written in.
///
/// # Errors
///
/// * `ConfigStoreError::Parse` - the text is not a configuration document
/// * `ConfigStoreError::UnsupportedSchemaVersion` - the version is unknown
/// * `ConfigStoreError::MigrationFailed` - an upgrade step rejected the document
pub fn load_document(text: &str) -> ConfigStoreResult<ParsedDocument> {
    check_prolog(text)?;

    let table: toml::Table = toml::from_str(text).map_err(|e| ConfigStoreError::Parse {
        reason: e.to_string().trim().to_string(),
    })?;

    let source_schema_version = read_schema_version(&table)?;
    let table = migration::migrate(table, source_schema_version)?;

    let config: CruiseConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigStoreError::Parse {
                reason: e.to_string().trim().to_string(),
            })?;

    debug!(
        source_schema_version,
        pipelines = config.all_pipelines().count(),
        "Configuration document parsed"
    );

    Ok(ParsedDocument {
        config,
        source_schema_version,
    })
}

/// Serializes a document into its canonical form.
pub fn serialize(config: &CruiseConfig) -> ConfigStoreResult<String> {
    toml::to_string(config).map_err(|e| ConfigStoreError::Serialization {
        reason: e.to_string(),
    })
}

/// Serializes a document and hashes the canonical bytes.
pub fn canonicalize(config: &CruiseConfig) -> ConfigStoreResult<CanonicalDocument> {
    let content = serialize(config)?;
    let md5 = md5_hex(content.as_bytes());
    Ok(CanonicalDocument { content, md5 })
}

/// Lowercase hex MD5 of the given bytes.
pub fn md5_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(bytes.as_ref()))
}

/// Rejects text that does not start like a document.
///
/// The first line that is neither blank nor a comment must be a table
/// header or a key/value pair.
fn check_prolog(text: &str) -> ConfigStoreResult<()> {
    let first_line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'));

    match first_line {
        None => Err(ConfigStoreError::Parse {
            reason: "Premature end of file.".to_string(),
        }),
        Some(line) if line.starts_with('[') || line.contains('=') => Ok(()),
        Some(_) => Err(ConfigStoreError::Parse {
            reason: "Content is not allowed in prolog.".to_string(),
        }),
    }
}

fn read_schema_version(table: &toml::Table) -> ConfigStoreResult<u32> {
    let value = table
        .get(SCHEMA_VERSION_KEY)
        .ok_or_else(|| ConfigStoreError::Parse {
            reason: "Schema version is missing".to_string(),
        })?;

    let version = value.as_integer().ok_or_else(|| ConfigStoreError::Parse {
        reason: format!("'{SCHEMA_VERSION_KEY}' must be an integer"),
    })?;

    if version < 1 || version > i64::from(CURRENT_SCHEMA_VERSION) {
        return Err(ConfigStoreError::UnsupportedSchemaVersion {
            found: version,
            current: CURRENT_SCHEMA_VERSION,
        });
    }

    // Range checked above.
    Ok(version as u32)
}
