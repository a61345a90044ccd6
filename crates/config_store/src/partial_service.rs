//! Intake of partial configurations from config repositories.
//!
//! A config repository material is polled for its latest partial. Every
//! successfully parsed partial is cached as last known and the current
//! configuration is re-composed with it; a partial that breaks the
//! effective configuration is rejected and the last valid one stays
//! active. Failures are remembered per repository so they can be shown
//! next to it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::data_source::ConfigDataSource;
use crate::errors::{ConfigStoreError, ConfigStoreResult};
use crate::model::{ConfigRepoConfig, PartialConfig};
use crate::snapshot::ConfigHolder;

#[cfg(test)]
#[path = "partial_service_tests.rs"]
mod tests;

/// Feeds partials into the data source and tracks per-repository errors.
pub struct PartialConfigService {
    source: Arc<ConfigDataSource>,
    errors: RwLock<HashMap<String, String>>,
}

impl PartialConfigService {
    pub fn new(source: Arc<ConfigDataSource>) -> Self {
        Self {
            source,
            errors: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_source(&self) -> &Arc<ConfigDataSource> {
        &self.source
    }

    /// Accepts a freshly parsed partial from `repo`.
    ///
    /// Returns the published configuration. When the partial is rejected the
    /// configuration keeps the last valid partial of `repo` and the
    /// rejection is available from [`errors_for`](Self::errors_for).
    ///
    /// # Errors
    ///
    /// Returns the error of re-composing the configuration when no
    /// combination of partials is valid.
    #[instrument(skip(self, repo, partial), fields(repo_id = %repo.id))]
    pub fn on_success_partial_config(
        &self,
        repo: &ConfigRepoConfig,
        partial: PartialConfig,
    ) -> ConfigStoreResult<Arc<ConfigHolder>> {
        let fingerprint = repo.fingerprint();
        debug!(revision = %partial.origin.revision, "Caching partial configuration");
        self.source
            .partial_cache()
            .cache_as_last_known(&fingerprint, partial);

        match self.source.revalidate_partials() {
            Ok(outcome) => {
                match outcome.rejected.iter().find(|r| r.fingerprint == fingerprint) {
                    Some(rejected) => self.record_error(&repo.id, &rejected.error.to_string()),
                    None => {
                        if self.errors.write().unwrap().remove(&repo.id).is_some() {
                            info!("Partial configuration of config repository is valid again");
                        }
                    }
                }
                Ok(outcome.holder)
            }
            Err(e) => {
                self.record_error(&repo.id, &e.to_string());
                Err(e)
            }
        }
    }

    /// Records that the latest content of `repo` could not be parsed.
    pub fn on_failed_partial_config(&self, repo: &ConfigRepoConfig, error: &str) {
        warn!(repo_id = %repo.id, "Failed to parse partial configuration: {}", error);
        self.record_error(&repo.id, error);
    }

    /// Last error recorded for the config repository with this id.
    pub fn errors_for(&self, repo_id: &str) -> Option<String> {
        self.errors.read().unwrap().get(repo_id).cloned()
    }

    fn record_error(&self, repo_id: &str, message: &str) {
        self.errors
            .write()
            .unwrap()
            .insert(repo_id.to_string(), message.to_string());
    }
}

/// Fetches the latest partial of a config repository.
#[async_trait]
pub trait PartialConfigProvider: Send + Sync {
    /// Loads and parses the partial at the repository's latest revision.
    ///
    /// # Errors
    ///
    /// Returns `ConfigStoreError::Parse` when the repository content is not
    /// a valid partial, or any error of reaching the repository.
    async fn load_partial(&self, repo: &ConfigRepoConfig) -> ConfigStoreResult<PartialConfig>;
}

/// Outcome of one polling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Repositories whose latest partial is active.
    pub loaded: usize,
    /// Repositories that failed to load or whose partial was rejected.
    pub failed: usize,
}

/// Polls every declared config repository once per round.
pub struct ConfigRepoPoller {
    provider: Arc<dyn PartialConfigProvider>,
    service: Arc<PartialConfigService>,
}

impl ConfigRepoPoller {
    pub fn new(provider: Arc<dyn PartialConfigProvider>, service: Arc<PartialConfigService>) -> Self {
        Self { provider, service }
    }

    /// Loads the latest partial of every config repository declared by the
    /// current configuration. A failing repository does not stop the others.
    pub async fn poll_once(&self) -> PollSummary {
        let repos = self
            .service
            .data_source()
            .current()
            .map(|holder| holder.config_for_edit.config_repos.clone())
            .unwrap_or_default();

        let mut summary = PollSummary::default();
        for repo in repos {
            if self.poll_repo(&repo).await {
                summary.loaded += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(
            loaded = summary.loaded,
            failed = summary.failed,
            "Config repository poll finished"
        );
        summary
    }

    async fn poll_repo(&self, repo: &ConfigRepoConfig) -> bool {
        let partial = match self.provider.load_partial(repo).await {
            Ok(partial) => partial,
            Err(e) => {
                self.service.on_failed_partial_config(repo, &e.to_string());
                return false;
            }
        };

        let service = self.service.clone();
        let owned_repo = repo.clone();
        let result = tokio::task::spawn_blocking(move || {
            service.on_success_partial_config(&owned_repo, partial)
        })
        .await
        .unwrap_or_else(|e| {
            Err(ConfigStoreError::CommandFailed {
                reason: format!("partial intake panicked: {e}"),
            })
        });

        match result {
            Ok(_) => self.service.errors_for(&repo.id).is_none(),
            Err(e) => {
                error!(repo_id = %repo.id, "Failed to apply partial configuration: {}", e);
                false
            }
        }
    }
}
