//! Commands that modify the configuration document.
//!
//! A command transforms one document into another. It may carry the MD5 of
//! the document it was prepared against (its optimistic concurrency token)
//! and the user making the change.
//!
//! # Examples
//!
//! ```rust
//! use config_store::{PipelineConfig, UpdateCommand};
//!
//! let mut command = UpdateCommand::new(|mut config| {
//!     config.add_pipeline("defaultGroup", PipelineConfig::new("build"));
//!     Ok(config)
//! })
//! .based_on("0f343b0931126a20f133d67c2b018a3b")
//! .as_user("admin");
//! # let _ = &mut command;
//! ```

use std::fmt;

use crate::errors::ConfigStoreResult;
use crate::model::CruiseConfig;

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;

/// User recorded for edits made directly to the backing file.
pub const FILESYSTEM_USER: &str = "Filesystem";

/// User recorded when neither the command nor the session names one.
pub const ANONYMOUS_USER: &str = "anonymous";

/// The user a change is attributed to in the versioned history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigModifyingUser {
    pub username: String,
}

impl ConfigModifyingUser {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
        }
    }

    pub fn filesystem() -> Self {
        Self::new(FILESYSTEM_USER)
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER)
    }
}

impl fmt::Display for ConfigModifyingUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.username)
    }
}

/// A change to the main configuration document.
pub trait UpdateConfigCommand {
    /// Applies the change to `config` and returns the changed document.
    ///
    /// # Errors
    ///
    /// Any error aborts the write; nothing is persisted.
    fn update(&mut self, config: CruiseConfig) -> ConfigStoreResult<CruiseConfig>;

    /// MD5 of the document the command was prepared against.
    ///
    /// `None` applies the command to the latest document.
    fn unmodified_md5(&self) -> Option<String> {
        None
    }

    /// User making the change.
    fn user(&self) -> Option<ConfigModifyingUser> {
        None
    }
}

/// Adapts a closure into an [`UpdateConfigCommand`].
pub struct UpdateCommand<F> {
    apply: F,
    unmodified_md5: Option<String>,
    user: Option<ConfigModifyingUser>,
}

impl<F> UpdateCommand<F>
where
    F: FnMut(CruiseConfig) -> ConfigStoreResult<CruiseConfig>,
{
    pub fn new(apply: F) -> Self {
        Self {
            apply,
            unmodified_md5: None,
            user: None,
        }
    }

    /// Marks the command as prepared against the document with this MD5.
    pub fn based_on(mut self, md5: &str) -> Self {
        self.unmodified_md5 = Some(md5.to_string());
        self
    }

    pub fn as_user(mut self, username: &str) -> Self {
        self.user = Some(ConfigModifyingUser::new(username));
        self
    }
}

impl<F> UpdateConfigCommand for UpdateCommand<F>
where
    F: FnMut(CruiseConfig) -> ConfigStoreResult<CruiseConfig>,
{
    fn update(&mut self, config: CruiseConfig) -> ConfigStoreResult<CruiseConfig> {
        (self.apply)(config)
    }

    fn unmodified_md5(&self) -> Option<String> {
        self.unmodified_md5.clone()
    }

    fn user(&self) -> Option<ConfigModifyingUser> {
        self.user.clone()
    }
}

/// Replaces the whole document. Used for full-document writes.
pub(crate) struct ReplaceConfig {
    replacement: CruiseConfig,
    unmodified_md5: Option<String>,
    user: Option<ConfigModifyingUser>,
}

impl ReplaceConfig {
    pub(crate) fn new(
        replacement: CruiseConfig,
        unmodified_md5: Option<String>,
        user: Option<ConfigModifyingUser>,
    ) -> Self {
        Self {
            replacement,
            unmodified_md5,
            user,
        }
    }
}

impl UpdateConfigCommand for ReplaceConfig {
    fn update(&mut self, _config: CruiseConfig) -> ConfigStoreResult<CruiseConfig> {
        Ok(self.replacement.clone())
    }

    fn unmodified_md5(&self) -> Option<String> {
        self.unmodified_md5.clone()
    }

    fn user(&self) -> Option<ConfigModifyingUser> {
        self.user.clone()
    }
}
