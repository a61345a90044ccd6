//! Versioned store for CI/CD pipeline configuration.
//!
//! The main configuration document lives in a single TOML file. Every saved
//! version is committed to a git repository and addressed by the MD5 of its
//! content. Edits are expressed as [`UpdateConfigCommand`]s; an edit based on
//! an outdated version is three-way merged with the latest document or
//! rejected. Partial configurations contributed by config repositories are
//! composed into the effective configuration, falling back to the last valid
//! partial of a repository when its newest one breaks the configuration.
//!
//! # Example
//!
//! ```
//! use config_store::{
//!     ConfigDataSource, CruiseConfig, MaterialConfig, PipelineConfig, StageConfig,
//!     StoreSettings, UpdateCommand,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::TempDir::new()?;
//! let source = ConfigDataSource::open(&StoreSettings::new(dir.path()))?;
//! let current = source.initialize()?;
//!
//! let mut command = UpdateCommand::new(|mut config: CruiseConfig| {
//!     let mut pipeline = PipelineConfig::new("build");
//!     pipeline
//!         .materials
//!         .push(MaterialConfig::git("https://example.com/app.git"));
//!     pipeline.stages.push(StageConfig::with_job("compile", "make"));
//!     config.add_pipeline("defaultGroup", pipeline);
//!     Ok(config)
//! })
//! .based_on(&current.md5)
//! .as_user("admin");
//!
//! let saved = source.write_with_lock(&mut command, &current)?;
//! assert!(saved.holder.config.has_pipeline_named("build"));
//! # Ok(())
//! # }
//! ```

// Document model and its serialized form
pub mod migration;
pub mod model;
pub mod schema;

pub mod errors;
pub mod validator;

// Versioned history
pub mod config_repository;

// Partial configuration
pub mod partial_service;
pub mod partials;

pub mod merger;

// Loading, saving and publishing
pub mod command;
pub mod data_source;
pub mod reload;
pub mod settings;
pub mod snapshot;

#[cfg(test)]
mod test_support;


pub use command::{
    ConfigModifyingUser, UpdateCommand, UpdateConfigCommand, ANONYMOUS_USER, FILESYSTEM_USER,
};
pub use config_repository::{ConfigRepository, ConfigRevision};
pub use data_source::{
    ConfigDataSource, ConfigSaveState, RejectedPartial, RevalidationOutcome, SaveResult,
};
pub use errors::{ConfigStoreError, ConfigStoreResult, CONFIG_CHANGED_PLEASE_REFRESH};
pub use merger::ConfigMerger;
pub use model::{
    Approval, ConfigOrigin, ConfigRepoConfig, CruiseConfig, EnvironmentConfig, JobConfig,
    MailHost, MaterialConfig, PartialConfig, PipelineConfig, PipelineGroup, RepoConfigOrigin,
    ServerConfig, StageConfig, TaskConfig, CONFIG_FILE_NAME, CURRENT_SCHEMA_VERSION,
    DEFAULT_GROUP_NAME,
};
pub use partial_service::{
    ConfigRepoPoller, PartialConfigProvider, PartialConfigService, PollSummary,
};
pub use partials::{compose_effective, PartialConfigCache};
pub use reload::{ConfigReloadTask, FileAttributes, ReloadState, ReloadTaskHandle};
pub use schema::{
    canonicalize, load_document, md5_hex, parse_document, serialize, CanonicalDocument,
    ParsedDocument,
};
pub use settings::{
    RuntimeSettings, SettingsProvider, StaticUserProvider, StoreSettings, UserProvider,
};
pub use snapshot::{ConfigChangeListener, ConfigHolder, SnapshotStore};
pub use validator::{
    ConfigValidator, ValidationError, ValidationErrorType, ValidationResult, ValidationWarning,
};
