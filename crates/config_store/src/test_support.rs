//! Fixtures shared by the unit and integration tests.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::command::UpdateCommand;
use crate::config_repository::{ConfigRepository, ConfigRevision};
use crate::data_source::{ConfigDataSource, SaveResult};
use crate::errors::ConfigStoreResult;
use crate::model::{
    ConfigRepoConfig, CruiseConfig, MaterialConfig, PartialConfig, PipelineConfig,
    RepoConfigOrigin, StageConfig,
};
use crate::schema::serialize;
use crate::settings::{RuntimeSettings, StaticUserProvider, StoreSettings};
use crate::snapshot::ConfigHolder;

/// Session user of every [`TestStore`].
pub(crate) const SESSION_USER: &str = "loser";

pub(crate) fn pipeline(name: &str) -> PipelineConfig {
    let mut pipeline = PipelineConfig::new(name);
    pipeline
        .materials
        .push(MaterialConfig::git(&format!("https://example.com/{name}.git")));
    pipeline.stages.push(StageConfig::with_job("build", "compile"));
    pipeline
}

pub(crate) fn dependent_pipeline(name: &str, upstream: &str, stage: &str) -> PipelineConfig {
    let mut pipeline = pipeline(name);
    pipeline
        .materials
        .push(MaterialConfig::dependency(upstream, stage));
    pipeline
}

pub(crate) fn config_repo(id: &str) -> ConfigRepoConfig {
    ConfigRepoConfig {
        id: id.to_string(),
        plugin_id: "toml.config.plugin".to_string(),
        material: MaterialConfig::git(&format!("https://example.com/{id}.git")),
    }
}

pub(crate) fn partial_for(
    repo: &ConfigRepoConfig,
    revision: &str,
    pipelines: Vec<PipelineConfig>,
) -> PartialConfig {
    let mut partial = PartialConfig::new(RepoConfigOrigin::new(repo, revision));
    for pipeline in pipelines {
        partial.add_pipeline("remote", pipeline);
    }
    partial
}

/// A partial whose only pipeline depends on a stage that does not exist.
pub(crate) fn invalid_partial(repo: &ConfigRepoConfig, revision: &str) -> PartialConfig {
    partial_for(
        repo,
        revision,
        vec![dependent_pipeline("remote_broken", "local", "no_such_stage")],
    )
}

/// A data source over a temporary directory.
pub(crate) struct TestStore {
    pub dir: TempDir,
    pub settings: Arc<RuntimeSettings>,
    pub source: Arc<ConfigDataSource>,
}

impl TestStore {
    /// An initialized store holding an empty configuration.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// An initialized store whose file starts with `config`.
    pub fn with_config(config: &CruiseConfig) -> Self {
        Self::build(Some(config))
    }

    fn build(initial: Option<&CruiseConfig>) -> Self {
        let dir = TempDir::new().unwrap();
        let store_settings = StoreSettings::new(dir.path().join("config"));
        std::fs::create_dir_all(&store_settings.config_dir).unwrap();

        if let Some(config) = initial {
            std::fs::write(store_settings.config_file(), serialize(config).unwrap()).unwrap();
        }

        let settings = Arc::new(RuntimeSettings::new(&store_settings));
        let repository = ConfigRepository::open(store_settings.history_dir()).unwrap();
        let source = ConfigDataSource::new(store_settings.config_file(), repository, settings.clone())
            .with_user_provider(Arc::new(StaticUserProvider::new(SESSION_USER)));
        source.initialize().unwrap();

        Self {
            dir,
            settings,
            source: Arc::new(source),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.source.location().to_path_buf()
    }

    pub fn file_content(&self) -> String {
        std::fs::read_to_string(self.config_file()).unwrap()
    }

    pub fn current(&self) -> Arc<ConfigHolder> {
        self.source.current().unwrap()
    }

    pub fn head(&self) -> ConfigRevision {
        self.source
            .config_repository()
            .get_current_revision()
            .unwrap()
            .unwrap()
    }

    pub fn history_len(&self) -> usize {
        self.source.config_repository().history(1000).unwrap().len()
    }

    /// Writes `config` to the backing file, bypassing the store.
    pub fn edit_file(&self, config: &CruiseConfig) {
        std::fs::write(self.config_file(), serialize(config).unwrap()).unwrap();
    }

    /// Adds a pipeline through a command based on `holder`.
    pub fn add_pipeline_based_on(
        &self,
        holder: &ConfigHolder,
        group: &str,
        pipeline: PipelineConfig,
    ) -> ConfigStoreResult<SaveResult> {
        let group = group.to_string();
        let mut command = UpdateCommand::new(move |mut config: CruiseConfig| {
            config.add_pipeline(&group, pipeline.clone());
            Ok(config)
        })
        .based_on(&holder.md5);
        self.source.write_with_lock(&mut command, holder)
    }

    /// Adds a pipeline through a command based on the current configuration.
    pub fn add_pipeline(&self, group: &str, pipeline: PipelineConfig) -> SaveResult {
        let holder = self.current();
        self.add_pipeline_based_on(&holder, group, pipeline).unwrap()
    }

    /// Declares a config repository in the main document.
    pub fn declare_config_repo(&self, repo: &ConfigRepoConfig) -> SaveResult {
        let holder = self.current();
        let repo = repo.clone();
        let mut command = UpdateCommand::new(move |mut config: CruiseConfig| {
            config.config_repos.push(repo.clone());
            Ok(config)
        })
        .based_on(&holder.md5);
        self.source.write_with_lock(&mut command, &holder).unwrap()
    }
}
