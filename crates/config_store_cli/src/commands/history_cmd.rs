use chrono::{DateTime, Utc};
use clap::Subcommand;
use config_store::{ConfigRepository, ConfigRevision, StoreSettings};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::errors::Error;

#[cfg(test)]
#[path = "history_cmd_tests.rs"]
mod tests;

/// Commands that inspect saved revisions
#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// List saved revisions, newest first
    History {
        /// Maximum number of revisions to list
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the content of a saved revision
    Revision {
        /// MD5 of the revision content
        md5: String,
    },
}

/// A saved revision without its content.
#[derive(Debug, Serialize)]
pub struct RevisionSummary {
    pub md5: String,
    pub username: String,
    pub time: DateTime<Utc>,
    pub schema_version: u32,
    pub go_version: String,
}

impl From<&ConfigRevision> for RevisionSummary {
    fn from(revision: &ConfigRevision) -> Self {
        Self {
            md5: revision.md5.clone(),
            username: revision.username.clone(),
            time: revision.time,
            schema_version: revision.schema_version,
            go_version: revision.go_version.clone(),
        }
    }
}

/// Execute a history command and return its output
#[instrument(skip(settings))]
pub fn execute(cmd: &HistoryCommands, settings: &StoreSettings) -> Result<String, Error> {
    let repository = ConfigRepository::open(settings.history_dir())?;
    match cmd {
        HistoryCommands::History { limit, json } => list_history(&repository, *limit, *json),
        HistoryCommands::Revision { md5 } => show_revision(&repository, md5),
    }
}

/// Lists up to `limit` revisions, newest first.
pub fn list_history(
    repository: &ConfigRepository,
    limit: usize,
    json: bool,
) -> Result<String, Error> {
    let summaries: Vec<RevisionSummary> = repository
        .history(limit)?
        .iter()
        .map(RevisionSummary::from)
        .collect();
    debug!(count = summaries.len(), "Listing configuration history");

    if json {
        return serde_json::to_string_pretty(&summaries).map_err(|e| Error::Output(e.to_string()));
    }

    let lines: Vec<String> = summaries
        .iter()
        .map(|s| {
            format!(
                "{}  {}  {}  schema {}",
                s.md5,
                s.time.to_rfc3339(),
                s.username,
                s.schema_version
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

/// Returns the content of the revision with this MD5.
pub fn show_revision(repository: &ConfigRepository, md5: &str) -> Result<String, Error> {
    let revision = repository.get_revision(md5)?;
    Ok(revision.content)
}
