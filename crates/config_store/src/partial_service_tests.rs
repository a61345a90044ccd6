//! Tests for partial configuration intake and polling.

use super::*;
use crate::model::{CruiseConfig, PipelineConfig};
use crate::test_support::{config_repo, invalid_partial, partial_for, pipeline, TestStore};
use std::sync::Mutex;

fn store_with_repos(ids: &[&str]) -> TestStore {
    let mut config = CruiseConfig::new();
    config.add_pipeline("grp", pipeline("local"));
    config.config_repos = ids.iter().map(|id| config_repo(id)).collect();
    TestStore::with_config(&config)
}

fn remote(name: &str) -> Vec<PipelineConfig> {
    vec![pipeline(name)]
}

mod service_tests {
    use super::*;

    #[test]
    fn test_valid_partial_becomes_active() {
        let store = store_with_repos(&["repo1"]);
        let service = PartialConfigService::new(store.source.clone());
        let repo = config_repo("repo1");

        let holder = service
            .on_success_partial_config(&repo, partial_for(&repo, "r1", remote("remote1")))
            .unwrap();

        assert!(holder.config.has_pipeline_named("remote1"));
        assert_eq!(service.errors_for("repo1"), None);
    }

    #[test]
    fn test_rejected_partial_records_error_and_keeps_last_valid() {
        let store = store_with_repos(&["repo1"]);
        let service = PartialConfigService::new(store.source.clone());
        let repo = config_repo("repo1");
        service
            .on_success_partial_config(&repo, partial_for(&repo, "r1", remote("remote1")))
            .unwrap();

        let holder = service
            .on_success_partial_config(&repo, invalid_partial(&repo, "r2"))
            .unwrap();

        assert!(holder.config.has_pipeline_named("remote1"));
        assert!(!holder.config.has_pipeline_named("remote_broken"));
        let error = service.errors_for("repo1").unwrap();
        assert!(error.contains("no_such_stage"));
    }

    #[test]
    fn test_error_is_cleared_by_next_valid_partial() {
        let store = store_with_repos(&["repo1"]);
        let service = PartialConfigService::new(store.source.clone());
        let repo = config_repo("repo1");
        service
            .on_success_partial_config(&repo, invalid_partial(&repo, "r1"))
            .unwrap();
        assert!(service.errors_for("repo1").is_some());

        let holder = service
            .on_success_partial_config(&repo, partial_for(&repo, "r2", remote("remote2")))
            .unwrap();

        assert!(holder.config.has_pipeline_named("remote2"));
        assert_eq!(service.errors_for("repo1"), None);
    }

    #[test]
    fn test_errors_are_tracked_per_repository() {
        let store = store_with_repos(&["repo1", "repo2"]);
        let service = PartialConfigService::new(store.source.clone());
        let repo1 = config_repo("repo1");
        let repo2 = config_repo("repo2");

        service
            .on_success_partial_config(&repo1, partial_for(&repo1, "r1", remote("remote1")))
            .unwrap();
        let holder = service
            .on_success_partial_config(&repo2, invalid_partial(&repo2, "r1"))
            .unwrap();

        assert!(holder.config.has_pipeline_named("remote1"));
        assert_eq!(service.errors_for("repo1"), None);
        assert!(service.errors_for("repo2").is_some());
    }

    #[test]
    fn test_parse_failure_is_recorded() {
        let store = store_with_repos(&["repo1"]);
        let service = PartialConfigService::new(store.source.clone());

        service.on_failed_partial_config(&config_repo("repo1"), "unexpected token at line 3");

        assert_eq!(
            service.errors_for("repo1").as_deref(),
            Some("unexpected token at line 3")
        );
    }

    #[test]
    fn test_unloaded_source_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = ConfigDataSource::open(&crate::settings::StoreSettings::new(dir.path())).unwrap();
        let service = PartialConfigService::new(Arc::new(source));
        let repo = config_repo("repo1");

        let result = service.on_success_partial_config(&repo, partial_for(&repo, "r1", remote("x")));

        assert!(matches!(result, Err(ConfigStoreError::NotLoaded { .. })));
        assert!(service.errors_for("repo1").is_some());
    }
}

mod poller_tests {
    use super::*;

    /// Serves canned partials by repository id and records the requests.
    struct FakeProvider {
        requests: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PartialConfigProvider for FakeProvider {
        async fn load_partial(&self, repo: &ConfigRepoConfig) -> ConfigStoreResult<PartialConfig> {
            self.requests.lock().unwrap().push(repo.id.clone());
            match repo.id.as_str() {
                "good" => Ok(partial_for(repo, "r1", remote("remote_good"))),
                "broken" => Ok(invalid_partial(repo, "r1")),
                _ => Err(ConfigStoreError::Parse {
                    reason: format!("no partial in {}", repo.id),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_poll_once_loads_every_declared_repo() {
        let store = store_with_repos(&["unreachable", "good", "broken"]);
        let service = Arc::new(PartialConfigService::new(store.source.clone()));
        let provider = Arc::new(FakeProvider::new());
        let poller = ConfigRepoPoller::new(provider.clone(), service.clone());

        let summary = poller.poll_once().await;

        assert_eq!(summary, PollSummary { loaded: 1, failed: 2 });
        assert_eq!(
            *provider.requests.lock().unwrap(),
            vec!["unreachable", "good", "broken"]
        );
        assert!(store.current().config.has_pipeline_named("remote_good"));
        assert!(!store.current().config.has_pipeline_named("remote_broken"));
        assert!(service.errors_for("unreachable").unwrap().contains("no partial in unreachable"));
        assert!(service.errors_for("broken").is_some());
        assert_eq!(service.errors_for("good"), None);
    }

    #[tokio::test]
    async fn test_poll_once_without_repos_does_nothing() {
        let store = TestStore::new();
        let service = Arc::new(PartialConfigService::new(store.source.clone()));
        let provider = Arc::new(FakeProvider::new());
        let poller = ConfigRepoPoller::new(provider.clone(), service);

        let summary = poller.poll_once().await;

        assert_eq!(summary, PollSummary::default());
        assert!(provider.requests.lock().unwrap().is_empty());
    }
}
