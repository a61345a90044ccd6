//! Published configuration snapshots.
//!
//! Readers load the current [`ConfigHolder`] without locking and never see a
//! partially applied write; the data source installs a new holder after
//! each successful load or save.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::model::{CruiseConfig, PartialConfig};

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;

/// A published configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigHolder {
    /// Effective configuration: the main document plus active partials.
    pub config: Arc<CruiseConfig>,
    /// The main document alone, the one edits are applied to.
    pub config_for_edit: Arc<CruiseConfig>,
    /// MD5 of the main document's persisted content.
    pub md5: String,
    /// Partials composed into `config`.
    pub partials: Vec<PartialConfig>,
}

impl ConfigHolder {
    pub fn new(
        config: CruiseConfig,
        config_for_edit: CruiseConfig,
        md5: String,
        partials: Vec<PartialConfig>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_for_edit: Arc::new(config_for_edit),
            md5,
            partials,
        }
    }
}

/// Receives every newly published configuration.
pub trait ConfigChangeListener: Send + Sync {
    fn on_config_change(&self, holder: &ConfigHolder);
}

/// Atomically swappable current and previous snapshots.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: ArcSwapOption<ConfigHolder>,
    previous: ArcSwapOption<ConfigHolder>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently published configuration, if any has been loaded.
    pub fn current(&self) -> Option<Arc<ConfigHolder>> {
        self.current.load_full()
    }

    /// Publishes `holder`, keeping the replaced snapshot as previous.
    pub fn install(&self, holder: ConfigHolder) -> Arc<ConfigHolder> {
        let holder = Arc::new(holder);
        debug!(md5 = %holder.md5, "Installing configuration snapshot");
        let replaced = self.current.swap(Some(holder.clone()));
        if replaced.is_some() {
            self.previous.store(replaced);
        }
        holder
    }

    /// The snapshot replaced by the most recent install.
    pub fn previous(&self) -> Option<Arc<ConfigHolder>> {
        self.previous.load_full()
    }

    pub fn clear(&self) {
        self.current.store(None);
        self.previous.store(None);
    }
}
