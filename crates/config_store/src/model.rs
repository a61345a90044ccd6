//! Pipeline configuration document model.
//!
//! The document is an explicit mapping of the schema onto Rust types. All
//! types derive Serde traits and are (de)serialized as TOML by the
//! [`schema`](crate::schema) module.
//!
//! # Example document
//!
//! ```toml
//! schema_version = 3
//!
//! [server]
//! artifacts_dir = "artifacts"
//!
//! [[pipeline_groups]]
//! name = "defaultGroup"
//!
//! [[pipeline_groups.pipelines]]
//! name = "build"
//!
//! [[pipeline_groups.pipelines.materials]]
//! type = "git"
//! url = "https://example.com/app.git"
//!
//! [[pipeline_groups.pipelines.stages]]
//! name = "compile"
//!
//! [[pipeline_groups.pipelines.stages.jobs]]
//! name = "make"
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;

/// Schema version written by this server.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// File name of the main configuration document.
pub const CONFIG_FILE_NAME: &str = "cruise-config.toml";

/// Name of the group that receives pipelines without an explicit group.
pub const DEFAULT_GROUP_NAME: &str = "defaultGroup";

/// Case-insensitive identity key for pipeline, stage, job and group names.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Root of a configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CruiseConfig {
    pub schema_version: u32,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_repos: Vec<ConfigRepoConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline_groups: Vec<PipelineGroup>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environments: Vec<EnvironmentConfig>,
}

impl Default for CruiseConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CruiseConfig {
    /// Creates an empty document at the current schema version.
    pub fn new() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            server: ServerConfig::default(),
            config_repos: Vec::new(),
            pipeline_groups: Vec::new(),
            environments: Vec::new(),
        }
    }

    /// Iterates over every pipeline of every group.
    pub fn all_pipelines(&self) -> impl Iterator<Item = &PipelineConfig> {
        self.pipeline_groups.iter().flat_map(|g| g.pipelines.iter())
    }

    pub fn all_pipeline_names(&self) -> Vec<String> {
        self.all_pipelines().map(|p| p.name.clone()).collect()
    }

    pub fn has_pipeline_named(&self, name: &str) -> bool {
        self.pipeline_named(name).is_some()
    }

    pub fn pipeline_named(&self, name: &str) -> Option<&PipelineConfig> {
        self.all_pipelines()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn pipeline_named_mut(&mut self, name: &str) -> Option<&mut PipelineConfig> {
        self.pipeline_groups
            .iter_mut()
            .flat_map(|g| g.pipelines.iter_mut())
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn find_group(&self, name: &str) -> Option<&PipelineGroup> {
        self.pipeline_groups
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name))
    }

    /// Adds a pipeline to the named group, creating the group when needed.
    pub fn add_pipeline(&mut self, group: &str, pipeline: PipelineConfig) {
        match self
            .pipeline_groups
            .iter_mut()
            .find(|g| g.name.eq_ignore_ascii_case(group))
        {
            Some(existing) => existing.pipelines.push(pipeline),
            None => self.pipeline_groups.push(PipelineGroup {
                name: group.to_string(),
                pipelines: vec![pipeline],
            }),
        }
    }

    /// Removes a pipeline by name, returning it when found.
    pub fn remove_pipeline(&mut self, name: &str) -> Option<PipelineConfig> {
        for group in &mut self.pipeline_groups {
            if let Some(position) = group
                .pipelines
                .iter()
                .position(|p| p.name.eq_ignore_ascii_case(name))
            {
                return Some(group.pipelines.remove(position));
            }
        }
        None
    }

    pub fn environment_named(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Fingerprints of the config repositories declared by this document.
    pub fn config_repo_fingerprints(&self) -> Vec<String> {
        self.config_repos.iter().map(|r| r.fingerprint()).collect()
    }
}

/// Server-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_artifacts_dir")]
    pub artifacts_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_timeout_minutes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail_host: Option<MailHost>,
}

impl ServerConfig {
    fn default_artifacts_dir() -> String {
        "artifacts".to_string()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: Self::default_artifacts_dir(),
            site_url: None,
            job_timeout_minutes: None,
            mail_host: None,
        }
    }
}

/// SMTP settings used for server notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailHost {
    pub hostname: String,
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default)]
    pub tls: bool,

    pub sender_email: String,
    pub admin_email: String,
}

/// An external repository that contributes partial configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRepoConfig {
    pub id: String,
    pub plugin_id: String,
    pub material: MaterialConfig,
}

impl ConfigRepoConfig {
    /// Stable identity of the repository, used to key cached partials.
    pub fn fingerprint(&self) -> String {
        self.material.fingerprint()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineGroup {
    pub name: String,

    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_behavior: Option<String>,

    #[serde(default)]
    pub materials: Vec<MaterialConfig>,

    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Where this pipeline was defined. Never serialized: pipelines in the
    /// main document always come from the file.
    #[serde(skip)]
    pub origin: ConfigOrigin,
}

impl PipelineConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label_template: None,
            lock_behavior: None,
            materials: Vec::new(),
            stages: Vec::new(),
            origin: ConfigOrigin::File,
        }
    }

    pub fn stage_named(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn first_stage(&self) -> Option<&StageConfig> {
        self.stages.first()
    }

    /// Upstream dependencies as `(pipeline, stage)` pairs.
    pub fn dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.materials.iter().filter_map(|m| match m {
            MaterialConfig::Dependency { pipeline, stage } => {
                Some((pipeline.as_str(), stage.as_str()))
            }
            _ => None,
        })
    }
}

/// A source of change for a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MaterialConfig {
    Git {
        url: String,
        #[serde(default = "default_branch")]
        branch: String,
    },
    Svn {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    Hg {
        url: String,
    },
    Dependency {
        pipeline: String,
        stage: String,
    },
}

fn default_branch() -> String {
    "master".to_string()
}

impl MaterialConfig {
    pub fn git(url: &str) -> Self {
        MaterialConfig::Git {
            url: url.to_string(),
            branch: default_branch(),
        }
    }

    pub fn dependency(pipeline: &str, stage: &str) -> Self {
        MaterialConfig::Dependency {
            pipeline: pipeline.to_string(),
            stage: stage.to_string(),
        }
    }

    /// Location shown to users for this material.
    pub fn display_url(&self) -> String {
        match self {
            MaterialConfig::Git { url, .. }
            | MaterialConfig::Svn { url, .. }
            | MaterialConfig::Hg { url } => url.clone(),
            MaterialConfig::Dependency { pipeline, stage } => format!("{pipeline}/{stage}"),
        }
    }

    /// SHA-256 over the attributes that identify the material.
    ///
    /// Credentials are not part of the identity.
    pub fn fingerprint(&self) -> String {
        let identity = match self {
            MaterialConfig::Git { url, branch } => format!("type=git<|>url={url}<|>branch={branch}"),
            MaterialConfig::Svn { url, .. } => format!("type=svn<|>url={url}"),
            MaterialConfig::Hg { url } => format!("type=hg<|>url={url}"),
            MaterialConfig::Dependency { pipeline, stage } => format!(
                "type=dependency<|>pipeline={}<|>stage={}",
                name_key(pipeline),
                name_key(stage)
            ),
        };
        hex::encode(Sha256::digest(identity.as_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Approval {
    #[default]
    Success,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub approval: Approval,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl StageConfig {
    /// A stage with a single job running one command.
    pub fn with_job(name: &str, job: &str) -> Self {
        Self {
            name: name.to_string(),
            approval: Approval::Success,
            jobs: vec![JobConfig {
                name: job.to_string(),
                resources: Vec::new(),
                tasks: vec![TaskConfig::Exec {
                    command: "echo".to_string(),
                    arguments: vec![job.to_string()],
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,

    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskConfig {
    Exec {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        arguments: Vec<String>,
    },
    Ant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    Rake {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pipelines: Vec::new(),
            agents: Vec::new(),
            variables: BTreeMap::new(),
        }
    }

    pub fn contains_pipeline(&self, name: &str) -> bool {
        self.pipelines.iter().any(|p| p.eq_ignore_ascii_case(name))
    }
}

/// Identifies the config repository revision a partial came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoConfigOrigin {
    pub repo_id: String,
    pub material_url: String,
    pub fingerprint: String,
    pub revision: String,
}

impl RepoConfigOrigin {
    pub fn new(repo: &ConfigRepoConfig, revision: &str) -> Self {
        Self {
            repo_id: repo.id.clone(),
            material_url: repo.material.display_url(),
            fingerprint: repo.fingerprint(),
            revision: revision.to_string(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} at revision {}", self.material_url, self.revision)
    }
}

/// Where a pipeline definition lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigOrigin {
    /// The main configuration file.
    #[default]
    File,
    /// A partial contributed by a config repository.
    Repo(RepoConfigOrigin),
}

impl ConfigOrigin {
    pub fn is_local(&self) -> bool {
        matches!(self, ConfigOrigin::File)
    }
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::File => write!(f, "{}", CONFIG_FILE_NAME),
            ConfigOrigin::Repo(origin) => write!(f, "{}", origin.display_name()),
        }
    }
}

/// Configuration fragment contributed by one config repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialConfig {
    pub origin: RepoConfigOrigin,

    #[serde(default)]
    pub pipeline_groups: Vec<PipelineGroup>,

    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
}

impl PartialConfig {
    pub fn new(origin: RepoConfigOrigin) -> Self {
        Self {
            origin,
            pipeline_groups: Vec::new(),
            environments: Vec::new(),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.origin.fingerprint
    }

    pub fn add_pipeline(&mut self, group: &str, pipeline: PipelineConfig) {
        match self
            .pipeline_groups
            .iter_mut()
            .find(|g| g.name.eq_ignore_ascii_case(group))
        {
            Some(existing) => existing.pipelines.push(pipeline),
            None => self.pipeline_groups.push(PipelineGroup {
                name: group.to_string(),
                pipelines: vec![pipeline],
            }),
        }
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipeline_groups
            .iter()
            .flat_map(|g| g.pipelines.iter().map(|p| p.name.clone()))
            .collect()
    }
}
