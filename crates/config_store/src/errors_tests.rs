//! Tests for configuration store error types.

use super::*;

#[test]
fn config_changed_message_asks_for_refresh() {
    let error = ConfigStoreError::ConfigChanged;

    assert_eq!(error.to_string(), CONFIG_CHANGED_PLEASE_REFRESH);
    assert!(error.to_string().contains("changed"));
    assert!(error.to_string().contains("refresh"));
}

#[test]
fn merge_conflict_names_the_element() {
    let error = ConfigStoreError::MergeConflict {
        element: "pipeline 'p0'".to_string(),
        reason: "modified by you and by someone else".to_string(),
    };

    assert_eq!(
        error.to_string(),
        "Configuration merge conflict on pipeline 'p0': modified by you and by someone else"
    );
}

#[test]
fn conflict_classification() {
    assert!(ConfigStoreError::ConfigChanged.is_conflict());
    assert!(ConfigStoreError::MergeConflict {
        element: "server settings".to_string(),
        reason: "x".to_string(),
    }
    .is_conflict());
    assert!(!ConfigStoreError::Parse {
        reason: "x".to_string()
    }
    .is_conflict());
}

#[test]
fn invalid_config_classification() {
    assert!(ConfigStoreError::Parse {
        reason: "x".to_string()
    }
    .is_invalid_config());
    assert!(ConfigStoreError::UnsupportedSchemaVersion {
        found: 99,
        current: 3
    }
    .is_invalid_config());
    assert!(ConfigStoreError::ValidationFailed {
        summary: "x".to_string(),
        errors: vec![],
    }
    .is_invalid_config());
    assert!(!ConfigStoreError::Repository {
        operation: "commit".to_string(),
        reason: "disk full".to_string(),
    }
    .is_invalid_config());
}

#[test]
fn io_error_carries_path() {
    let error = ConfigStoreError::io(
        std::path::Path::new("/tmp/cruise-config.toml"),
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    );

    assert_eq!(
        error.to_string(),
        "Failed to access configuration file: /tmp/cruise-config.toml - denied"
    );
}

#[test]
fn error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ConfigStoreError>();
}
