//! Structural and referential validation of configuration documents.
//!
//! Validation runs against the *effective* configuration: the main document
//! with all active partials composed in. Every rule is evaluated and all
//! problems are collected in a single [`ValidationResult`] rather than
//! stopping at the first one.
//!
//! # Examples
//!
//! ```rust
//! use config_store::{ConfigValidator, CruiseConfig};
//!
//! let validator = ConfigValidator::new();
//! let result = validator.validate(&CruiseConfig::new());
//!
//! assert!(result.is_valid());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::errors::{ConfigStoreError, ConfigStoreResult};
use crate::model::{name_key, CruiseConfig, MaterialConfig, PipelineConfig};

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

/// Maximum length of pipeline, stage, job, group and environment names.
pub const MAX_NAME_LENGTH: usize = 255;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_\-.]+$").expect("name pattern is valid"))
}

/// Result of validating a configuration.
///
/// Validation is considered successful only if no errors are present.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (blocking issues).
    pub errors: Vec<ValidationError>,
    /// List of validation warnings (non-blocking).
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Error messages in the order they were found.
    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }

    /// Converts the result into `Ok(())` or a
    /// [`ConfigStoreError::ValidationFailed`] listing every error message.
    pub fn into_result(self) -> ConfigStoreResult<()> {
        if self.is_valid() {
            return Ok(());
        }

        Err(ConfigStoreError::ValidationFailed {
            summary: self.messages().join("; "),
            errors: self.errors,
        })
    }
}

/// Individual validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The category of validation error.
    pub error_type: ValidationErrorType,
    /// Dot-separated path to the element that failed validation.
    pub field_path: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional suggestion for how to fix the error.
    pub suggestion: Option<String>,
}

impl ValidationError {
    fn new(error_type: ValidationErrorType, field_path: String, message: String) -> Self {
        Self {
            error_type,
            field_path,
            message,
            suggestion: None,
        }
    }

    fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }
}

/// Validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorType {
    /// A name does not match the allowed pattern or is too long.
    InvalidName,
    /// Two elements share an identity that must be unique.
    DuplicateName,
    /// A required element is missing.
    RequiredFieldMissing,
    /// A reference points at something that does not exist.
    UnknownReference,
    /// Pipeline dependencies form a cycle.
    CircularDependency,
    /// A cross-element rule was violated.
    BusinessRuleViolation,
}

impl std::fmt::Display for ValidationErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "InvalidName"),
            Self::DuplicateName => write!(f, "DuplicateName"),
            Self::RequiredFieldMissing => write!(f, "RequiredFieldMissing"),
            Self::UnknownReference => write!(f, "UnknownReference"),
            Self::CircularDependency => write!(f, "CircularDependency"),
            Self::BusinessRuleViolation => write!(f, "BusinessRuleViolation"),
        }
    }
}

/// Non-blocking validation warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub field_path: String,
    pub message: String,
}

/// Validates effective configurations.
#[derive(Debug, Clone, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    /// Runs every rule against `config` and collects the findings.
    pub fn validate(&self, config: &CruiseConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        self.validate_server(config, &mut result);
        self.validate_config_repos(config, &mut result);
        self.validate_groups(config, &mut result);
        self.validate_pipelines(config, &mut result);
        self.validate_dependencies(config, &mut result);
        self.validate_dependency_cycles(config, &mut result);
        self.validate_environments(config, &mut result);

        debug!(
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Configuration validated"
        );

        result
    }

    // ========================================================================
    // Names
    // ========================================================================

    fn check_name(&self, kind: &str, name: &str, field_path: &str, result: &mut ValidationResult) {
        let valid = name.len() <= MAX_NAME_LENGTH
            && !name.starts_with('.')
            && name_pattern().is_match(name);

        if !valid {
            result.add_error(
                ValidationError::new(
                    ValidationErrorType::InvalidName,
                    field_path.to_string(),
                    format!(
                        "Invalid {kind} name '{name}'. This must be alphanumeric and can contain underscores, hyphens and periods (however, it cannot start with a period). The maximum allowed length is {MAX_NAME_LENGTH} characters."
                    ),
                )
                .with_suggestion("Rename the element using only letters, digits, '_', '-' and '.'"),
            );
        }
    }

    // ========================================================================
    // Server and config repositories
    // ========================================================================

    fn validate_server(&self, config: &CruiseConfig, result: &mut ValidationResult) {
        if config.server.artifacts_dir.trim().is_empty() {
            result.add_error(ValidationError::new(
                ValidationErrorType::RequiredFieldMissing,
                "server.artifacts_dir".to_string(),
                "Artifacts directory must not be empty".to_string(),
            ));
        }
    }

    fn validate_config_repos(&self, config: &CruiseConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for repo in &config.config_repos {
            let field_path = format!("config_repos.{}", repo.id);

            if !seen.insert(repo.id.as_str()) {
                result.add_error(ValidationError::new(
                    ValidationErrorType::DuplicateName,
                    field_path.clone(),
                    format!(
                        "You have defined multiple configuration repositories with the same id - '{}'",
                        repo.id
                    ),
                ));
            }

            match &repo.material {
                MaterialConfig::Dependency { .. } => {
                    result.add_error(ValidationError::new(
                        ValidationErrorType::BusinessRuleViolation,
                        format!("{field_path}.material"),
                        format!(
                            "Configuration repository '{}' cannot use a dependency material",
                            repo.id
                        ),
                    ));
                }
                material if material.display_url().trim().is_empty() => {
                    result.add_error(ValidationError::new(
                        ValidationErrorType::RequiredFieldMissing,
                        format!("{field_path}.material.url"),
                        format!("Configuration repository '{}' must have a material url", repo.id),
                    ));
                }
                _ => {}
            }
        }
    }

    // ========================================================================
    // Groups, pipelines, stages and jobs
    // ========================================================================

    fn validate_groups(&self, config: &CruiseConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for group in &config.pipeline_groups {
            let field_path = format!("pipeline_groups.{}", group.name);
            self.check_name("group", &group.name, &field_path, result);

            if !seen.insert(name_key(&group.name)) {
                result.add_error(ValidationError::new(
                    ValidationErrorType::DuplicateName,
                    field_path,
                    format!("Group with name '{}' is defined more than once", group.name),
                ));
            }
        }

        let mut pipeline_counts: HashMap<String, usize> = HashMap::new();
        for pipeline in config.all_pipelines() {
            *pipeline_counts.entry(name_key(&pipeline.name)).or_default() += 1;
        }

        let mut reported = HashSet::new();
        for pipeline in config.all_pipelines() {
            let key = name_key(&pipeline.name);
            if pipeline_counts.get(&key).copied().unwrap_or(0) > 1 && reported.insert(key) {
                result.add_error(
                    ValidationError::new(
                        ValidationErrorType::DuplicateName,
                        format!("pipelines.{}", pipeline.name),
                        format!(
                            "You have defined multiple pipelines named '{}'. Pipeline names must be unique.",
                            pipeline.name
                        ),
                    )
                    .with_suggestion("Rename one of the pipelines or remove the duplicate definition"),
                );
            }
        }
    }

    fn validate_pipelines(&self, config: &CruiseConfig, result: &mut ValidationResult) {
        for group in &config.pipeline_groups {
            for pipeline in &group.pipelines {
                self.validate_pipeline(&group.name, pipeline, result);
            }
        }
    }

    fn validate_pipeline(&self, group: &str, pipeline: &PipelineConfig, result: &mut ValidationResult) {
        let field_path = format!("pipeline_groups.{group}.pipelines.{}", pipeline.name);
        self.check_name("pipeline", &pipeline.name, &field_path, result);

        if pipeline.materials.is_empty() {
            result.add_error(ValidationError::new(
                ValidationErrorType::RequiredFieldMissing,
                format!("{field_path}.materials"),
                format!(
                    "Pipeline '{}' must have at least one material ({})",
                    pipeline.name, pipeline.origin
                ),
            ));
        }

        if pipeline.stages.is_empty() {
            result.add_error(ValidationError::new(
                ValidationErrorType::RequiredFieldMissing,
                format!("{field_path}.stages"),
                format!(
                    "Pipeline '{}' does not have any stages configured. A pipeline must have at least one stage. ({})",
                    pipeline.name, pipeline.origin
                ),
            ));
        }

        let mut stage_names = HashSet::new();
        for stage in &pipeline.stages {
            let stage_path = format!("{field_path}.stages.{}", stage.name);
            self.check_name("stage", &stage.name, &stage_path, result);

            if !stage_names.insert(name_key(&stage.name)) {
                result.add_error(ValidationError::new(
                    ValidationErrorType::DuplicateName,
                    stage_path.clone(),
                    format!(
                        "You have defined multiple stages called '{}' in pipeline '{}'. Stage names are case-insensitive and must be unique.",
                        stage.name, pipeline.name
                    ),
                ));
            }

            if stage.jobs.is_empty() {
                result.add_error(ValidationError::new(
                    ValidationErrorType::RequiredFieldMissing,
                    format!("{stage_path}.jobs"),
                    format!(
                        "Stage '{}' of pipeline '{}' must have at least one job",
                        stage.name, pipeline.name
                    ),
                ));
            }

            let mut job_names = HashSet::new();
            for job in &stage.jobs {
                let job_path = format!("{stage_path}.jobs.{}", job.name);
                self.check_name("job", &job.name, &job_path, result);

                if !job_names.insert(name_key(&job.name)) {
                    result.add_error(ValidationError::new(
                        ValidationErrorType::DuplicateName,
                        job_path.clone(),
                        format!(
                            "You have defined multiple jobs called '{}' in stage '{}' of pipeline '{}'. Job names are case-insensitive and must be unique.",
                            job.name, stage.name, pipeline.name
                        ),
                    ));
                }

                if job.tasks.is_empty() {
                    result.add_warning(ValidationWarning {
                        field_path: format!("{job_path}.tasks"),
                        message: format!(
                            "Job '{}' of stage '{}' in pipeline '{}' has no tasks",
                            job.name, stage.name, pipeline.name
                        ),
                    });
                }
            }
        }
    }

    // ========================================================================
    // Dependencies
    // ========================================================================

    fn validate_dependencies(&self, config: &CruiseConfig, result: &mut ValidationResult) {
        for pipeline in config.all_pipelines() {
            for (upstream, stage) in pipeline.dependencies() {
                let field_path = format!("pipelines.{}.materials.{upstream}", pipeline.name);

                let Some(upstream_pipeline) = config.pipeline_named(upstream) else {
                    result.add_error(ValidationError::new(
                        ValidationErrorType::UnknownReference,
                        field_path,
                        format!(
                            "Pipeline with name '{upstream}' does not exist, it is defined as a dependency for pipeline '{}' ({})",
                            pipeline.name, pipeline.origin
                        ),
                    ));
                    continue;
                };

                if upstream_pipeline.stage_named(stage).is_none() {
                    result.add_error(ValidationError::new(
                        ValidationErrorType::UnknownReference,
                        field_path,
                        format!(
                            "Stage with name '{stage}' does not exist on pipeline '{upstream}', it is being referred to from pipeline '{}' ({})",
                            pipeline.name, pipeline.origin
                        ),
                    ));
                }
            }
        }
    }

    fn validate_dependency_cycles(&self, config: &CruiseConfig, result: &mut ValidationResult) {
        let mut graph: HashMap<String, (&str, Vec<String>)> = HashMap::new();
        for pipeline in config.all_pipelines() {
            let upstreams = pipeline
                .dependencies()
                .map(|(upstream, _)| name_key(upstream))
                .collect();
            graph
                .entry(name_key(&pipeline.name))
                .or_insert((pipeline.name.as_str(), upstreams));
        }

        let mut finished = HashSet::new();
        let mut reported = HashSet::new();
        for pipeline in config.all_pipelines() {
            let mut path = Vec::new();
            find_cycles(
                &graph,
                &name_key(&pipeline.name),
                &mut path,
                &mut finished,
                &mut reported,
                result,
            );
        }
    }

    // ========================================================================
    // Environments
    // ========================================================================

    fn validate_environments(&self, config: &CruiseConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        let mut membership: HashMap<String, &str> = HashMap::new();

        for environment in &config.environments {
            let field_path = format!("environments.{}", environment.name);
            self.check_name("environment", &environment.name, &field_path, result);

            if !seen.insert(name_key(&environment.name)) {
                result.add_error(ValidationError::new(
                    ValidationErrorType::DuplicateName,
                    field_path.clone(),
                    format!(
                        "Environment with name '{}' is defined more than once",
                        environment.name
                    ),
                ));
            }

            for pipeline in &environment.pipelines {
                if !config.has_pipeline_named(pipeline) {
                    result.add_error(ValidationError::new(
                        ValidationErrorType::UnknownReference,
                        format!("{field_path}.pipelines"),
                        format!(
                            "Environment '{}' refers to an unknown pipeline '{pipeline}'.",
                            environment.name
                        ),
                    ));
                }

                match membership.get(&name_key(pipeline)) {
                    Some(other) if !other.eq_ignore_ascii_case(&environment.name) => {
                        result.add_error(ValidationError::new(
                            ValidationErrorType::BusinessRuleViolation,
                            format!("{field_path}.pipelines"),
                            format!(
                                "Pipeline '{pipeline}' is associated with multiple environments: '{other}' and '{}'",
                                environment.name
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        membership.insert(name_key(pipeline), environment.name.as_str());
                    }
                }
            }
        }
    }
}

/// Depth-first walk over upstream edges, reporting each cycle once.
fn find_cycles(
    graph: &HashMap<String, (&str, Vec<String>)>,
    node: &str,
    path: &mut Vec<String>,
    finished: &mut HashSet<String>,
    reported: &mut HashSet<Vec<String>>,
    result: &mut ValidationResult,
) {
    if finished.contains(node) {
        return;
    }

    if let Some(start) = path.iter().position(|n| n == node) {
        let cycle = &path[start..];
        let mut identity = cycle.to_vec();
        identity.sort();
        if reported.insert(identity) {
            let display = |key: &String| {
                graph
                    .get(key)
                    .map(|(name, _)| name.to_string())
                    .unwrap_or_else(|| key.clone())
            };
            let mut names: Vec<String> = cycle.iter().map(display).collect();
            names.push(display(&node.to_string()));
            result.add_error(ValidationError::new(
                ValidationErrorType::CircularDependency,
                format!("pipelines.{}", names[0]),
                format!("Circular dependency: {}", names.join(" <- ")),
            ));
        }
        return;
    }

    let Some((_, upstreams)) = graph.get(node) else {
        return;
    };

    path.push(node.to_string());
    for upstream in upstreams {
        find_cycles(graph, upstream, path, finished, reported, result);
    }
    path.pop();
    finished.insert(node.to_string());
}
