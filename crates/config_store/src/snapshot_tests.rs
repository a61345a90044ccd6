use super::*;
use crate::model::PipelineConfig;

fn holder(md5: &str) -> ConfigHolder {
    let mut config = CruiseConfig::new();
    config.add_pipeline("grp", PipelineConfig::new(md5));
    ConfigHolder::new(config.clone(), config, md5.to_string(), Vec::new())
}

#[test]
fn test_empty_store_has_no_snapshot() {
    let store = SnapshotStore::new();

    assert!(store.current().is_none());
    assert!(store.previous().is_none());
}

#[test]
fn test_install_publishes_and_keeps_previous() {
    let store = SnapshotStore::new();

    store.install(holder("first"));
    store.install(holder("second"));

    assert_eq!(store.current().unwrap().md5, "second");
    assert_eq!(store.previous().unwrap().md5, "first");
}

#[test]
fn test_readers_keep_their_snapshot_after_install() {
    let store = SnapshotStore::new();
    store.install(holder("first"));
    let reader_view = store.current().unwrap();

    store.install(holder("second"));

    assert_eq!(reader_view.md5, "first");
    assert!(reader_view.config.has_pipeline_named("first"));
}

#[test]
fn test_clear() {
    let store = SnapshotStore::new();
    store.install(holder("first"));
    store.install(holder("second"));

    store.clear();

    assert!(store.current().is_none());
    assert!(store.previous().is_none());
}
