//! Command modules for the configuration store CLI.
//!
//! - `store_cmd`: show, validate, write and load the configuration
//! - `history_cmd`: inspect saved revisions

use std::sync::Arc;

use config_store::{ConfigDataSource, StaticUserProvider, StoreSettings};
use tracing::debug;

use crate::errors::Error;

pub mod history_cmd;
pub mod store_cmd;

/// Opens and initializes the store described by `settings`.
///
/// Edits are attributed to `user` when given.
pub fn open_store(settings: &StoreSettings, user: Option<&str>) -> Result<ConfigDataSource, Error> {
    debug!(config_file = %settings.config_file().display(), "Opening configuration store");

    let users = match user {
        Some(name) => StaticUserProvider::new(name),
        None => StaticUserProvider::none(),
    };
    let source = ConfigDataSource::open(settings)?.with_user_provider(Arc::new(users));
    source.initialize()?;
    Ok(source)
}
