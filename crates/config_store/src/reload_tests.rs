//! Tests for reload detection and the periodic reload task.

use super::*;
use crate::command::FILESYSTEM_USER;
use crate::model::CruiseConfig;
use crate::test_support::{pipeline, TestStore};
use tempfile::TempDir;
use tracing_test::traced_test;

fn config_with(name: &str) -> CruiseConfig {
    let mut config = CruiseConfig::new();
    config.add_pipeline("grp", pipeline(name));
    config
}

fn touch(path: &Path, offset_secs: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
        .unwrap();
}

mod reload_state_tests {
    use super::*;

    #[test]
    fn test_everything_is_modified_before_first_record() {
        let state = ReloadState::new();
        let attributes = FileAttributes {
            len: 10,
            modified: Some(SystemTime::UNIX_EPOCH),
        };

        assert!(state.is_modified(&attributes));
        assert_eq!(state.last_observed(), None);
    }

    #[test]
    fn test_size_or_time_change_is_modified() {
        let mut state = ReloadState::new();
        let recorded = FileAttributes {
            len: 10,
            modified: Some(SystemTime::UNIX_EPOCH),
        };
        state.record(recorded);

        assert!(!state.is_modified(&recorded));
        assert!(state.is_modified(&FileAttributes { len: 11, ..recorded }));
        assert!(state.is_modified(&FileAttributes {
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1)),
            ..recorded
        }));
    }

    #[test]
    fn test_observe_reads_file_attributes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.toml");
        fs::write(&path, "12345").unwrap();

        let attributes = ReloadState::observe(&path).unwrap();

        assert_eq!(attributes.len, 5);
        assert!(attributes.modified.is_some());
    }

    #[test]
    fn test_observe_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();

        let result = ReloadState::observe(&dir.path().join("missing.toml"));

        assert!(matches!(result, Err(ConfigStoreError::Io { .. })));
    }

    #[test]
    fn test_modified_display_without_time() {
        let attributes = FileAttributes {
            len: 0,
            modified: None,
        };

        assert_eq!(attributes.modified_display(), "unknown time");
    }
}

mod reload_tests {
    use super::*;

    #[test]
    #[traced_test]
    fn test_changed_file_is_reloaded_once() {
        let store = TestStore::new();
        store.edit_file(&config_with("edited"));

        let first = store.source.reload_if_modified().unwrap();
        let second = store.source.reload_if_modified().unwrap();

        assert!(first.unwrap().config.has_pipeline_named("edited"));
        assert!(second.is_none());
        assert_eq!(store.head().username, FILESYSTEM_USER);
        assert!(logs_contain("Config file changed at"));
    }

    #[test]
    fn test_touched_file_with_same_content_is_not_reloaded() {
        let store = TestStore::with_config(&config_with("p1"));
        let before = store.current();
        touch(&store.config_file(), 60);

        let result = store.source.reload_if_modified().unwrap();

        assert!(result.is_none());
        assert!(Arc::ptr_eq(&before, &store.current()));
        assert_eq!(store.history_len(), 1);
    }

    #[test]
    fn test_own_writes_are_not_reloaded() {
        let store = TestStore::new();
        store.add_pipeline("grp", pipeline("p1"));
        let after_write = store.current();

        assert!(store.source.reload_if_modified().unwrap().is_none());
        assert!(Arc::ptr_eq(&after_write, &store.current()));
    }

    #[test]
    fn test_deleted_file_is_io_error() {
        let store = TestStore::new();
        let before = store.current();
        fs::remove_file(store.config_file()).unwrap();

        let result = store.source.reload_if_modified();

        assert!(matches!(result, Err(ConfigStoreError::Io { .. })));
        assert!(Arc::ptr_eq(&before, &store.current()));
    }
}

mod task_tests {
    use super::*;

    async fn wait_for_pipeline(source: &ConfigDataSource, name: &str) -> bool {
        for _ in 0..100 {
            if source
                .current()
                .is_some_and(|holder| holder.config.has_pipeline_named(name))
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_task_picks_up_file_change() {
        let store = TestStore::new();
        let handle =
            ConfigReloadTask::new(store.source.clone(), Duration::from_millis(20)).spawn();

        store.edit_file(&config_with("from_disk"));

        assert!(wait_for_pipeline(&store.source, "from_disk").await);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_survives_invalid_file() {
        let store = TestStore::new();
        let handle =
            ConfigReloadTask::new(store.source.clone(), Duration::from_millis(20)).spawn();

        fs::write(store.config_file(), "abc").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.edit_file(&config_with("fixed"));

        assert!(wait_for_pipeline(&store.source, "fixed").await);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let store = TestStore::new();
        let (sender, receiver) = watch::channel(false);
        let task = ConfigReloadTask::new(store.source.clone(), Duration::from_millis(20));
        let join = tokio::spawn(task.run(receiver));

        drop(sender);

        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
    }
}
