//! Detection of out-of-band edits to the configuration file.
//!
//! The data source remembers the size and modification time of the file as
//! last loaded or written. A reload check compares the current attributes
//! first and only hashes the content when they changed.
//!
//! [`ConfigReloadTask`] runs the check periodically on the tokio runtime.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::data_source::ConfigDataSource;
use crate::errors::{ConfigStoreError, ConfigStoreResult};

#[cfg(test)]
#[path = "reload_tests.rs"]
mod tests;

/// Size and modification time of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileAttributes {
    /// Modification time formatted for log messages.
    pub fn modified_display(&self) -> String {
        self.modified
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
            .unwrap_or_else(|| "unknown time".to_string())
    }
}

/// Attributes of the configuration file as last observed by the data source.
#[derive(Debug, Default)]
pub struct ReloadState {
    last: Option<FileAttributes>,
}

impl ReloadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the current attributes of `path`.
    pub fn observe(path: &Path) -> ConfigStoreResult<FileAttributes> {
        let metadata = fs::metadata(path).map_err(|e| ConfigStoreError::io(path, e))?;
        Ok(FileAttributes {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    /// Whether `attributes` differ from the last recorded ones.
    pub fn is_modified(&self, attributes: &FileAttributes) -> bool {
        self.last.as_ref() != Some(attributes)
    }

    pub fn record(&mut self, attributes: FileAttributes) {
        self.last = Some(attributes);
    }

    pub fn last_observed(&self) -> Option<FileAttributes> {
        self.last
    }
}

/// Periodically reloads the configuration file when it changed on disk.
pub struct ConfigReloadTask {
    source: Arc<ConfigDataSource>,
    interval: Duration,
}

/// Handle of a running [`ConfigReloadTask`].
pub struct ReloadTaskHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReloadTaskHandle {
    /// Stops the task and waits for the current check to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!("Configuration reload task ended abnormally: {}", e);
        }
    }
}

impl ConfigReloadTask {
    pub fn new(source: Arc<ConfigDataSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Spawns the task on the current tokio runtime.
    pub fn spawn(self) -> ReloadTaskHandle {
        let (shutdown, receiver) = watch::channel(false);
        let join = tokio::spawn(self.run(receiver));
        ReloadTaskHandle { shutdown, join }
    }

    /// Runs reload checks until `shutdown` turns `true` or its sender is
    /// dropped. Failed checks are logged; the published snapshot stays.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            path = %self.source.location().display(),
            "Configuration reload task started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Configuration reload task stopped");
    }

    async fn check_once(&self) {
        let source = self.source.clone();
        match tokio::task::spawn_blocking(move || source.reload_if_modified()).await {
            Ok(Ok(Some(holder))) => {
                info!(md5 = %holder.md5, "Configuration reloaded from file");
            }
            Ok(Ok(None)) => debug!("Configuration file unchanged"),
            Ok(Err(e)) => error!("Failed to reload configuration file: {}", e),
            Err(e) => error!("Configuration reload check panicked: {}", e),
        }
    }
}
