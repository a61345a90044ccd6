//! Git-backed, append-only history of saved configuration documents.
//!
//! Every document the store saves is committed to a local git repository on
//! the `master` branch. The commit message carries the metadata of the
//! revision so that any revision can be found again by the MD5 of its
//! content:
//!
//! ```text
//! user:admin
//! timestamp:2024-05-01T10:00:00.000000Z
//! schema_version:3
//! go_version:24.1.0
//! md5:0f343b0931126a20f133d67c2b018a3b
//! ```
//!
//! The repository is opened per operation; callers serialize writes through
//! the data source's write lock.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use git2::{ErrorCode, Repository, RepositoryInitOptions, Signature, Sort};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::errors::{ConfigStoreError, ConfigStoreResult};
use crate::model::CONFIG_FILE_NAME;

#[cfg(test)]
#[path = "config_repository_tests.rs"]
mod tests;

/// Branch holding the configuration history.
pub const HISTORY_BRANCH: &str = "master";

const COMMITTER_EMAIL: &str = "config-store@localhost";

/// A saved revision of the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigRevision {
    pub md5: String,
    pub username: String,
    pub go_version: String,
    pub schema_version: u32,
    pub time: DateTime<Utc>,
    pub content: String,

    /// Commit holding this revision, once committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

impl ConfigRevision {
    pub fn new(
        content: String,
        md5: String,
        username: &str,
        go_version: &str,
        schema_version: u32,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            md5,
            username: username.to_string(),
            go_version: go_version.to_string(),
            schema_version,
            time,
            content,
            commit_sha: None,
        }
    }

    fn commit_message(&self) -> String {
        format!(
            "user:{}\ntimestamp:{}\nschema_version:{}\ngo_version:{}\nmd5:{}",
            self.username,
            self.time.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.schema_version,
            self.go_version,
            self.md5
        )
    }
}

/// Metadata parsed back out of a commit message.
#[derive(Debug, Default)]
struct RevisionMetadata {
    username: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    schema_version: Option<u32>,
    go_version: Option<String>,
    md5: Option<String>,
}

impl RevisionMetadata {
    fn parse(message: &str) -> Self {
        let mut metadata = Self::default();
        for line in message.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "user" => metadata.username = Some(value.to_string()),
                "timestamp" => {
                    metadata.timestamp = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|t| t.with_timezone(&Utc))
                }
                "schema_version" => metadata.schema_version = value.parse().ok(),
                "go_version" => metadata.go_version = Some(value.to_string()),
                "md5" => metadata.md5 = Some(value.to_string()),
                _ => {}
            }
        }
        metadata
    }
}

/// Versioned store of configuration revisions.
#[derive(Debug, Clone)]
pub struct ConfigRepository {
    work_dir: PathBuf,
}

impl ConfigRepository {
    /// Opens the history repository in `dir`, initializing it when absent.
    ///
    /// # Errors
    ///
    /// Returns `ConfigStoreError::Io` when the directory cannot be created and
    /// `ConfigStoreError::Repository` when git initialization fails.
    pub fn open(dir: impl Into<PathBuf>) -> ConfigStoreResult<Self> {
        let work_dir = dir.into();
        fs::create_dir_all(&work_dir).map_err(|e| ConfigStoreError::io(&work_dir, e))?;

        match Repository::open(&work_dir) {
            Ok(_) => {
                debug!(path = %work_dir.display(), "Opened configuration history repository");
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                let mut options = RepositoryInitOptions::new();
                options.initial_head(HISTORY_BRANCH);
                Repository::init_opts(&work_dir, &options).map_err(git_error("init"))?;
                info!(path = %work_dir.display(), "Initialized configuration history repository");
            }
            Err(e) => return Err(git_error("open")(e)),
        }

        Ok(Self { work_dir })
    }

    /// Directory of the history repository.
    pub fn path(&self) -> &Path {
        &self.work_dir
    }

    /// Commits a revision and returns the commit sha.
    ///
    /// When the head revision already has the same MD5 nothing is committed
    /// and the head sha is returned.
    pub fn commit(&self, revision: &ConfigRevision) -> ConfigStoreResult<String> {
        let repo = self.repository()?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit().map_err(git_error("read head"))?),
            Err(e) if is_unborn(&e) => None,
            Err(e) => return Err(git_error("read head")(e)),
        };

        if let Some(parent) = &parent {
            let head_md5 = RevisionMetadata::parse(parent.message().unwrap_or_default()).md5;
            if head_md5.as_deref() == Some(revision.md5.as_str()) {
                debug!(md5 = %revision.md5, "Revision already at head, skipping commit");
                return Ok(parent.id().to_string());
            }
        }

        let file = self.work_dir.join(CONFIG_FILE_NAME);
        fs::write(&file, &revision.content).map_err(|e| ConfigStoreError::io(&file, e))?;

        let mut index = repo.index().map_err(git_error("open index"))?;
        index
            .add_path(Path::new(CONFIG_FILE_NAME))
            .map_err(git_error("stage configuration"))?;
        index.write().map_err(git_error("write index"))?;
        let tree_oid = index.write_tree().map_err(git_error("write tree"))?;
        let tree = repo.find_tree(tree_oid).map_err(git_error("find tree"))?;

        let name = if revision.username.trim().is_empty() {
            "anonymous"
        } else {
            revision.username.as_str()
        };
        let signature = Signature::now(name, COMMITTER_EMAIL).map_err(git_error("create signature"))?;

        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_oid = repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                &revision.commit_message(),
                &tree,
                &parents,
            )
            .map_err(git_error("commit"))?;

        info!(
            md5 = %revision.md5,
            user = %revision.username,
            commit = %commit_oid,
            "Configuration revision committed"
        );

        Ok(commit_oid.to_string())
    }

    /// Finds the newest revision whose content has the given MD5.
    ///
    /// # Errors
    ///
    /// Returns `ConfigStoreError::RevisionNotFound` when no commit carries
    /// the MD5.
    pub fn get_revision(&self, md5: &str) -> ConfigStoreResult<ConfigRevision> {
        let repo = self.repository()?;
        for oid in self.walk(&repo)? {
            let commit = repo.find_commit(oid).map_err(git_error("find commit"))?;
            let metadata = RevisionMetadata::parse(commit.message().unwrap_or_default());
            if metadata.md5.as_deref() == Some(md5) {
                return self.to_revision(&repo, &commit, metadata);
            }
        }

        debug!(md5, "No configuration revision with md5");
        Err(ConfigStoreError::RevisionNotFound {
            md5: md5.to_string(),
        })
    }

    /// The head revision, or `None` for an empty history.
    pub fn get_current_revision(&self) -> ConfigStoreResult<Option<ConfigRevision>> {
        Ok(self.history(1)?.into_iter().next())
    }

    /// Up to `limit` revisions, newest first.
    pub fn history(&self, limit: usize) -> ConfigStoreResult<Vec<ConfigRevision>> {
        let repo = self.repository()?;
        let mut revisions = Vec::new();
        for oid in self.walk(&repo)?.into_iter().take(limit) {
            let commit = repo.find_commit(oid).map_err(git_error("find commit"))?;
            let metadata = RevisionMetadata::parse(commit.message().unwrap_or_default());
            revisions.push(self.to_revision(&repo, &commit, metadata)?);
        }
        Ok(revisions)
    }

    fn repository(&self) -> ConfigStoreResult<Repository> {
        Repository::open(&self.work_dir).map_err(git_error("open"))
    }

    fn walk(&self, repo: &Repository) -> ConfigStoreResult<Vec<git2::Oid>> {
        let head = match repo.head() {
            Ok(head) => head.target(),
            Err(e) if is_unborn(&e) => None,
            Err(e) => return Err(git_error("read head")(e)),
        };
        let Some(head) = head else {
            return Ok(Vec::new());
        };

        let mut revwalk = repo.revwalk().map_err(git_error("walk history"))?;
        revwalk
            .set_sorting(Sort::TOPOLOGICAL)
            .map_err(git_error("walk history"))?;
        revwalk.push(head).map_err(git_error("walk history"))?;
        revwalk
            .collect::<Result<Vec<_>, _>>()
            .map_err(git_error("walk history"))
    }

    fn to_revision(
        &self,
        repo: &Repository,
        commit: &git2::Commit,
        metadata: RevisionMetadata,
    ) -> ConfigStoreResult<ConfigRevision> {
        let tree = commit.tree().map_err(git_error("read tree"))?;
        let entry = tree
            .get_name(CONFIG_FILE_NAME)
            .ok_or_else(|| ConfigStoreError::Repository {
                operation: "read revision".to_string(),
                reason: format!("commit {} has no {}", commit.id(), CONFIG_FILE_NAME),
            })?;
        let blob = repo.find_blob(entry.id()).map_err(git_error("read blob"))?;
        let content = String::from_utf8(blob.content().to_vec()).map_err(|e| {
            ConfigStoreError::Repository {
                operation: "read revision".to_string(),
                reason: e.to_string(),
            }
        })?;

        let time = metadata
            .timestamp
            .or_else(|| DateTime::from_timestamp(commit.time().seconds(), 0))
            .unwrap_or_default();

        Ok(ConfigRevision {
            md5: metadata.md5.unwrap_or_default(),
            username: metadata
                .username
                .unwrap_or_else(|| commit.author().name().unwrap_or_default().to_string()),
            go_version: metadata.go_version.unwrap_or_default(),
            schema_version: metadata.schema_version.unwrap_or_default(),
            time,
            content,
            commit_sha: Some(commit.id().to_string()),
        })
    }
}

fn is_unborn(error: &git2::Error) -> bool {
    matches!(error.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound)
}

fn git_error(operation: &'static str) -> impl Fn(git2::Error) -> ConfigStoreError {
    move |e| {
        error!(operation, "Config repository operation failed: {}", e);
        ConfigStoreError::Repository {
            operation: operation.to_string(),
            reason: e.message().to_string(),
        }
    }
}
