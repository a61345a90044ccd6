//! The configuration data source.
//!
//! [`ConfigDataSource`] owns the backing file and coordinates every load and
//! save of the configuration:
//!
//! ```text
//! write_with_lock(command, holder)
//!     → lock, reload the file if it changed on disk
//!     → apply the command (Updated) or three-way merge a stale edit (Merged)
//!     → compose partials and validate, falling back to last valid partials
//!     → replace the file atomically, commit to the history
//!     → publish the snapshot, notify listeners
//! ```
//!
//! A single mutex serializes loads and saves. Readers use the snapshot store
//! and never block on it. A failed load or save changes nothing: not the
//! file, not the history, not the published snapshot.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::command::{ConfigModifyingUser, ReplaceConfig, UpdateConfigCommand, FILESYSTEM_USER};
use crate::config_repository::{ConfigRepository, ConfigRevision};
use crate::errors::{ConfigStoreError, ConfigStoreResult};
use crate::merger::ConfigMerger;
use crate::model::{CruiseConfig, PartialConfig, CURRENT_SCHEMA_VERSION};
use crate::partials::{compose_effective, PartialConfigCache};
use crate::reload::ReloadState;
use crate::schema::{canonicalize, load_document, md5_hex, parse_document};
use crate::settings::{SettingsProvider, StaticUserProvider, StoreSettings, UserProvider};
use crate::snapshot::{ConfigChangeListener, ConfigHolder, SnapshotStore};
use crate::validator::ConfigValidator;

#[cfg(test)]
#[path = "data_source_tests.rs"]
mod tests;

/// How a successful save was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSaveState {
    /// The command was applied to the latest document.
    Updated,
    /// The command was applied to an older revision and merged with the
    /// latest document.
    Merged,
}

/// Outcome of a successful save.
#[derive(Debug, Clone)]
pub struct SaveResult {
    pub state: ConfigSaveState,
    pub holder: Arc<ConfigHolder>,
}

/// A partial that could not be activated.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedPartial {
    pub fingerprint: String,
    pub error: ConfigStoreError,
}

/// Outcome of re-composing the current document with the known partials.
#[derive(Debug, Clone)]
pub struct RevalidationOutcome {
    pub holder: Arc<ConfigHolder>,
    pub rejected: Vec<RejectedPartial>,
}

/// Effective configuration chosen for a main document.
#[derive(Debug)]
struct ResolvedPartials {
    effective: CruiseConfig,
    active: Vec<PartialConfig>,
    promote: Vec<PartialConfig>,
    rejected: Vec<RejectedPartial>,
}

/// Loads, saves and publishes the configuration document.
pub struct ConfigDataSource {
    config_file: PathBuf,
    repository: ConfigRepository,
    partials: Arc<PartialConfigCache>,
    validator: ConfigValidator,
    merger: ConfigMerger,
    snapshots: Arc<SnapshotStore>,
    settings: Arc<dyn SettingsProvider>,
    users: Arc<dyn UserProvider>,
    listeners: RwLock<Vec<Arc<dyn ConfigChangeListener>>>,
    write_lock: Mutex<ReloadState>,
}

impl ConfigDataSource {
    /// Creates a data source for `config_file` with an empty partial cache,
    /// an empty snapshot store and no session user.
    pub fn new(
        config_file: impl Into<PathBuf>,
        repository: ConfigRepository,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            config_file: config_file.into(),
            repository,
            partials: Arc::new(PartialConfigCache::new()),
            validator: ConfigValidator::new(),
            merger: ConfigMerger::new(),
            snapshots: Arc::new(SnapshotStore::new()),
            settings,
            users: Arc::new(StaticUserProvider::none()),
            listeners: RwLock::new(Vec::new()),
            write_lock: Mutex::new(ReloadState::new()),
        }
    }

    /// Opens the data source described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns the error of opening the history repository.
    pub fn open(settings: &StoreSettings) -> ConfigStoreResult<Self> {
        let repository = ConfigRepository::open(settings.history_dir())?;
        Ok(Self::new(
            settings.config_file(),
            repository,
            Arc::new(settings.clone()),
        ))
    }

    pub fn with_partials(mut self, partials: Arc<PartialConfigCache>) -> Self {
        self.partials = partials;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<SnapshotStore>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_user_provider(mut self, users: Arc<dyn UserProvider>) -> Self {
        self.users = users;
        self
    }

    /// Registers a listener notified after every publish.
    pub fn register_listener(&self, listener: Arc<dyn ConfigChangeListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Path of the backing file.
    pub fn location(&self) -> &Path {
        &self.config_file
    }

    pub fn config_repository(&self) -> &ConfigRepository {
        &self.repository
    }

    pub fn partial_cache(&self) -> &Arc<PartialConfigCache> {
        &self.partials
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    /// The published configuration, if any.
    pub fn current(&self) -> Option<Arc<ConfigHolder>> {
        self.snapshots.current()
    }

    /// Loads the backing file, creating an empty document when it is absent.
    #[instrument(skip(self), fields(path = %self.config_file.display()))]
    pub fn initialize(&self) -> ConfigStoreResult<Arc<ConfigHolder>> {
        let mut state = self.lock_state();

        if !self.config_file.exists() {
            if let Some(parent) = self.config_file.parent() {
                fs::create_dir_all(parent).map_err(|e| ConfigStoreError::io(parent, e))?;
            }
            let canonical = canonicalize(&CruiseConfig::new())?;
            info!("Configuration file not found, writing an empty configuration");
            self.persist(&ConfigRevision::new(
                canonical.content,
                canonical.md5,
                FILESYSTEM_USER,
                &self.settings.server_version(),
                CURRENT_SCHEMA_VERSION,
                Utc::now(),
            ))?;
        }

        let path = self.config_file.clone();
        self.force_load_locked(&path, &mut state)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Applies `command` and saves the result.
    ///
    /// `holder` is the configuration the caller prepared the command
    /// against. When the command's token names that holder, the holder's
    /// document is used as merge base without a history lookup.
    ///
    /// # Errors
    ///
    /// * `ConfigStoreError::ConfigChanged` - the command is stale and merging
    ///   is disabled or its base revision is unknown
    /// * `ConfigStoreError::MergeConflict` - the stale edit conflicts with
    ///   the latest document
    /// * `ConfigStoreError::ValidationFailed` - the result is invalid
    /// * any error returned by the command itself
    #[instrument(skip(self, command, holder), fields(holder_md5 = %holder.md5))]
    pub fn write_with_lock(
        &self,
        command: &mut dyn UpdateConfigCommand,
        holder: &ConfigHolder,
    ) -> ConfigStoreResult<SaveResult> {
        let mut state = self.lock_state();

        if let Err(e) = self.reload_locked(&mut state) {
            warn!("Ignoring unloadable configuration file while saving: {}", e);
        }

        let current = self.snapshots.current().ok_or_else(|| self.not_loaded())?;
        let user = self.resolve_user(command.user());

        let (save_state, main) = match command.unmodified_md5() {
            Some(token) if token != current.md5 => {
                if !self.settings.is_config_merge_enabled() {
                    info!(token = %token, current = %current.md5, "Rejecting stale edit, merge disabled");
                    return Err(ConfigStoreError::ConfigChanged);
                }

                let base = self.merge_base(&token, holder)?;
                let ours = command.update(base.clone())?;
                let merged = self.merger.merge(&base, &ours, &current.config_for_edit)?;
                info!(token = %token, current = %current.md5, "Stale edit merged with latest configuration");
                (ConfigSaveState::Merged, merged)
            }
            _ => {
                let updated = command.update((*current.config_for_edit).clone())?;
                (ConfigSaveState::Updated, updated)
            }
        };

        let resolved = self.resolve_partials(&main)?;
        let canonical = canonicalize(&main)?;
        let revision = ConfigRevision::new(
            canonical.content,
            canonical.md5,
            &user.username,
            &self.settings.server_version(),
            main.schema_version,
            Utc::now(),
        );
        self.persist(&revision)?;
        self.record_attributes(&mut state);

        let holder = self.publish(main, resolved, revision.md5);
        info!(md5 = %holder.md5, user = %user, state = ?save_state, "Configuration saved");

        Ok(SaveResult {
            state: save_state,
            holder,
        })
    }

    /// Saves a complete document.
    ///
    /// With `bypass_merge` the document replaces the latest saved document.
    /// Otherwise it is treated as an edit of the currently published
    /// configuration and merged when the file changed underneath.
    #[instrument(skip(self, content))]
    pub fn write(&self, content: &str, bypass_merge: bool) -> ConfigStoreResult<SaveResult> {
        let view = self.snapshots.current().ok_or_else(|| self.not_loaded())?;
        let parsed = load_document(content)?;

        let token = if bypass_merge {
            None
        } else {
            Some(view.md5.clone())
        };
        let mut command = ReplaceConfig::new(parsed.config, token, None);

        self.write_with_lock(&mut command, &view)
    }

    fn merge_base(&self, token: &str, holder: &ConfigHolder) -> ConfigStoreResult<CruiseConfig> {
        if holder.md5 == token {
            return Ok((*holder.config_for_edit).clone());
        }

        match self.repository.get_revision(token) {
            Ok(revision) => parse_document(&revision.content),
            Err(ConfigStoreError::RevisionNotFound { .. }) => {
                info!(token, "Merge base revision not found");
                Err(ConfigStoreError::ConfigChanged)
            }
            Err(e) => Err(e),
        }
    }

    fn resolve_user(&self, command_user: Option<ConfigModifyingUser>) -> ConfigModifyingUser {
        command_user
            .or_else(|| {
                self.users
                    .current_user()
                    .map(|name| ConfigModifyingUser::new(&name))
            })
            .unwrap_or_else(ConfigModifyingUser::anonymous)
    }

    /// Atomically replaces the backing file with `revision` and commits it.
    ///
    /// The history is only committed once the file is in place. When the
    /// commit fails the previous file content is put back.
    fn persist(&self, revision: &ConfigRevision) -> ConfigStoreResult<()> {
        let previous = fs::read(&self.config_file).ok();
        self.replace_file(revision.content.as_bytes())?;

        if let Err(e) = self.repository.commit(revision) {
            error!(md5 = %revision.md5, "Failed to commit configuration, restoring previous file: {}", e);
            let restored = match previous {
                Some(bytes) => self.replace_file(&bytes),
                None => fs::remove_file(&self.config_file)
                    .map_err(|e| ConfigStoreError::io(&self.config_file, e)),
            };
            if let Err(restore_error) = restored {
                error!("Failed to restore configuration file {:?}: {}", self.config_file, restore_error);
            }
            return Err(e);
        }

        debug!(md5 = %revision.md5, "Configuration file written");
        Ok(())
    }

    fn replace_file(&self, content: &[u8]) -> ConfigStoreResult<()> {
        let file_name = self
            .config_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = self
            .config_file
            .with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        fs::write(&temp, content).map_err(|e| {
            error!("Failed to write temporary configuration file {:?}: {}", temp, e);
            ConfigStoreError::io(&temp, e)
        })?;

        fs::rename(&temp, &self.config_file).map_err(|e| {
            error!("Failed to replace configuration file {:?}: {}", self.config_file, e);
            let _ = fs::remove_file(&temp);
            ConfigStoreError::io(&self.config_file, e)
        })
    }

    /// Takes the write lock.
    ///
    /// A command that panicked while holding the lock leaves the reload
    /// state intact, so a poisoned lock is recovered.
    fn lock_state(&self) -> MutexGuard<'_, ReloadState> {
        self.write_lock.lock().unwrap_or_else(|poisoned| {
            warn!("Recovering write lock poisoned by a panicked save");
            poisoned.into_inner()
        })
    }

    fn record_attributes(&self, state: &mut ReloadState) {
        match ReloadState::observe(&self.config_file) {
            Ok(attributes) => state.record(attributes),
            Err(e) => warn!("Failed to read configuration file attributes: {}", e),
        }
    }

    fn not_loaded(&self) -> ConfigStoreError {
        ConfigStoreError::NotLoaded {
            path: self.config_file.display().to_string(),
        }
    }

    // ========================================================================
    // Loads
    // ========================================================================

    /// Loads the document at `path` and publishes it.
    ///
    /// Edits made directly to the file are committed to the history as user
    /// `Filesystem`. Documents in an older schema version are rewritten in
    /// the current version. A document read from another path replaces the
    /// backing file.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn force_load(&self, path: &Path) -> ConfigStoreResult<Arc<ConfigHolder>> {
        let mut state = self.lock_state();
        self.force_load_locked(path, &mut state)
    }

    /// Reloads the backing file when it changed since it was last loaded or
    /// written. Returns the newly published configuration, or `None` when
    /// nothing changed.
    pub fn reload_if_modified(&self) -> ConfigStoreResult<Option<Arc<ConfigHolder>>> {
        let mut state = self.lock_state();
        self.reload_locked(&mut state)
    }

    /// Alias of [`reload_if_modified`](Self::reload_if_modified) used by the
    /// periodic reload task.
    pub fn load(&self) -> ConfigStoreResult<Option<Arc<ConfigHolder>>> {
        self.reload_if_modified()
    }

    /// Re-composes the current document with the last known partials and
    /// publishes the result.
    #[instrument(skip(self))]
    pub fn revalidate_partials(&self) -> ConfigStoreResult<RevalidationOutcome> {
        let _state = self.lock_state();

        let current = self.snapshots.current().ok_or_else(|| self.not_loaded())?;
        let main = (*current.config_for_edit).clone();
        let resolved = self.resolve_partials(&main)?;
        let rejected = resolved.rejected.clone();
        let holder = self.publish(main, resolved, current.md5.clone());

        Ok(RevalidationOutcome { holder, rejected })
    }

    fn reload_locked(&self, state: &mut ReloadState) -> ConfigStoreResult<Option<Arc<ConfigHolder>>> {
        let attributes = ReloadState::observe(&self.config_file)?;
        if !state.is_modified(&attributes) {
            return Ok(None);
        }

        debug!("Config file changed at {}", attributes.modified_display());

        let bytes = fs::read(&self.config_file).map_err(|e| ConfigStoreError::io(&self.config_file, e))?;
        let md5 = md5_hex(&bytes);
        if self.snapshots.current().is_some_and(|current| current.md5 == md5) {
            debug!(md5 = %md5, "Config file content unchanged");
            state.record(attributes);
            return Ok(None);
        }

        let path = self.config_file.clone();
        self.force_load_locked(&path, state).map(Some)
    }

    fn force_load_locked(
        &self,
        path: &Path,
        state: &mut ReloadState,
    ) -> ConfigStoreResult<Arc<ConfigHolder>> {
        let bytes = fs::read(path).map_err(|e| ConfigStoreError::io(path, e))?;
        let md5 = md5_hex(&bytes);
        let text = String::from_utf8(bytes).map_err(|e| ConfigStoreError::Parse {
            reason: e.to_string(),
        })?;

        let parsed = load_document(&text).map_err(|e| {
            error!("Failed to load configuration from {:?}: {}", path, e);
            e
        })?;
        let resolved = self.resolve_partials(&parsed.config)?;

        let migrated = parsed.was_migrated();
        let (content, md5) = if migrated {
            let canonical = canonicalize(&parsed.config)?;
            info!(
                from_version = parsed.source_schema_version,
                "Rewriting configuration file in current schema version"
            );
            (canonical.content, canonical.md5)
        } else {
            (text, md5)
        };

        let revision = ConfigRevision::new(
            content,
            md5,
            FILESYSTEM_USER,
            &self.settings.server_version(),
            parsed.config.schema_version,
            Utc::now(),
        );
        if migrated || path != self.config_file {
            self.persist(&revision)?;
        } else {
            self.repository.commit(&revision)?;
        }
        self.record_attributes(state);

        let holder = self.publish(parsed.config, resolved, revision.md5);
        info!(md5 = %holder.md5, "Configuration loaded");
        Ok(holder)
    }

    // ========================================================================
    // Partials and publishing
    // ========================================================================

    /// Picks the partials to compose with `main`.
    ///
    /// All last known partials are tried first. When that fails, the last
    /// valid partials are the baseline and each newer known partial is added
    /// on its own if the result still validates.
    fn resolve_partials(&self, main: &CruiseConfig) -> ConfigStoreResult<ResolvedPartials> {
        let declared: HashSet<String> = main.config_repo_fingerprints().into_iter().collect();
        let by_fingerprint = |partials: Vec<PartialConfig>| -> BTreeMap<String, PartialConfig> {
            partials
                .into_iter()
                .filter(|p| declared.contains(p.fingerprint()))
                .map(|p| (p.fingerprint().to_string(), p))
                .collect()
        };
        let known = by_fingerprint(self.partials.last_known_partials());
        let valid = by_fingerprint(self.partials.last_valid_partials());

        let known_list: Vec<PartialConfig> = known.values().cloned().collect();
        let effective = compose_effective(main, &known_list);
        let known_error = match self.validator.validate(&effective).into_result() {
            Ok(()) => {
                let promote = known
                    .iter()
                    .filter(|(fingerprint, partial)| valid.get(*fingerprint) != Some(*partial))
                    .map(|(_, partial)| partial.clone())
                    .collect();
                return Ok(ResolvedPartials {
                    effective,
                    active: known_list,
                    promote,
                    rejected: Vec::new(),
                });
            }
            Err(error) => error,
        };

        if known == valid {
            return Err(known_error);
        }
        debug!("Known partials failed validation, falling back to last valid partials: {}", known_error);

        let valid_list: Vec<PartialConfig> = valid.values().cloned().collect();
        self.validator
            .validate(&compose_effective(main, &valid_list))
            .into_result()?;

        let mut active = valid.clone();
        let mut promote = Vec::new();
        let mut rejected = Vec::new();
        for (fingerprint, partial) in &known {
            if valid.get(fingerprint) == Some(partial) {
                continue;
            }

            let mut candidate = active.clone();
            candidate.insert(fingerprint.clone(), partial.clone());
            let candidate_list: Vec<PartialConfig> = candidate.values().cloned().collect();

            match self
                .validator
                .validate(&compose_effective(main, &candidate_list))
                .into_result()
            {
                Ok(()) => {
                    active = candidate;
                    promote.push(partial.clone());
                }
                Err(error) => {
                    warn!(
                        fingerprint = %fingerprint,
                        origin = %partial.origin.display_name(),
                        "Partial configuration rejected, using last valid partial: {}",
                        error
                    );
                    rejected.push(RejectedPartial {
                        fingerprint: fingerprint.clone(),
                        error,
                    });
                }
            }
        }

        let active: Vec<PartialConfig> = active.into_values().collect();
        Ok(ResolvedPartials {
            effective: compose_effective(main, &active),
            active,
            promote,
            rejected,
        })
    }

    fn publish(
        &self,
        main: CruiseConfig,
        resolved: ResolvedPartials,
        md5: String,
    ) -> Arc<ConfigHolder> {
        for partial in &resolved.promote {
            self.partials.mark_as_valid(partial.fingerprint(), partial.clone());
        }
        self.partials.retain(&main.config_repo_fingerprints());

        let holder = self.snapshots.install(ConfigHolder::new(
            resolved.effective,
            main,
            md5,
            resolved.active,
        ));

        for listener in self.listeners.read().unwrap().iter() {
            listener.on_config_change(&holder);
        }

        holder
    }
}
