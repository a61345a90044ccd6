//! Tests for the partial configuration cache and composition.

use super::*;
use crate::model::{
    ConfigRepoConfig, EnvironmentConfig, MaterialConfig, PipelineConfig, RepoConfigOrigin,
};

fn repo(url: &str) -> ConfigRepoConfig {
    ConfigRepoConfig {
        id: url.to_string(),
        plugin_id: "toml.config.plugin".to_string(),
        material: MaterialConfig::git(url),
    }
}

fn partial(url: &str, revision: &str, pipelines: &[&str]) -> PartialConfig {
    let mut partial = PartialConfig::new(RepoConfigOrigin::new(&repo(url), revision));
    for name in pipelines {
        partial.add_pipeline("remote", PipelineConfig::new(name));
    }
    partial
}

mod cache_tests {
    use super::*;

    #[test]
    fn test_known_partial_is_not_valid_until_marked() {
        let cache = PartialConfigCache::new();
        let p = partial("https://example.com/a.git", "r1", &["a"]);

        cache.cache_as_last_known(p.fingerprint(), p.clone());

        assert_eq!(cache.get_known(p.fingerprint()), Some(p.clone()));
        assert_eq!(cache.get_valid(p.fingerprint()), None);
        assert!(cache.last_valid_partials().is_empty());
    }

    #[test]
    fn test_mark_all_known_as_valid() {
        let cache = PartialConfigCache::new();
        let a = partial("https://example.com/a.git", "r1", &["a"]);
        let b = partial("https://example.com/b.git", "r1", &["b"]);
        cache.cache_as_last_known(a.fingerprint(), a.clone());
        cache.cache_as_last_known(b.fingerprint(), b.clone());

        cache.mark_all_known_as_valid();

        assert_eq!(cache.last_valid_partials(), cache.last_known_partials());
        assert_eq!(cache.last_valid_partials().len(), 2);
    }

    #[test]
    fn test_newer_known_partial_does_not_displace_valid() {
        let cache = PartialConfigCache::new();
        let good = partial("https://example.com/a.git", "r1", &["a"]);
        let newer = partial("https://example.com/a.git", "r2", &["a", "broken"]);
        cache.cache_as_last_known(good.fingerprint(), good.clone());
        cache.mark_as_valid(good.fingerprint(), good.clone());

        cache.cache_as_last_known(newer.fingerprint(), newer.clone());

        assert_eq!(cache.get_known(good.fingerprint()), Some(newer));
        assert_eq!(cache.get_valid(good.fingerprint()), Some(good));
    }

    #[test]
    fn test_partials_are_sorted_by_fingerprint() {
        let cache = PartialConfigCache::new();
        let mut partials = vec![
            partial("https://example.com/a.git", "r1", &[]),
            partial("https://example.com/b.git", "r1", &[]),
            partial("https://example.com/c.git", "r1", &[]),
        ];
        for p in &partials {
            cache.cache_as_last_known(p.fingerprint(), p.clone());
        }
        partials.sort_by(|a, b| a.fingerprint().cmp(b.fingerprint()));

        assert_eq!(cache.last_known_partials(), partials);
    }

    #[test]
    fn test_retain_drops_undeclared_repositories() {
        let cache = PartialConfigCache::new();
        let a = partial("https://example.com/a.git", "r1", &[]);
        let b = partial("https://example.com/b.git", "r1", &[]);
        for p in [&a, &b] {
            cache.cache_as_last_known(p.fingerprint(), p.clone());
            cache.mark_as_valid(p.fingerprint(), p.clone());
        }

        cache.retain(&[a.fingerprint().to_string()]);

        assert_eq!(cache.last_known_partials(), vec![a.clone()]);
        assert_eq!(cache.last_valid_partials(), vec![a]);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = PartialConfigCache::new();
        let a = partial("https://example.com/a.git", "r1", &[]);
        cache.cache_as_last_known(a.fingerprint(), a.clone());
        cache.mark_as_valid(a.fingerprint(), a.clone());

        assert_eq!(cache.remove_valid(a.fingerprint()), Some(a.clone()));
        assert_eq!(cache.get_known(a.fingerprint()), Some(a.clone()));

        cache.clear();
        assert!(cache.last_known_partials().is_empty());
        assert_eq!(cache.remove_known(a.fingerprint()), None);
    }
}

mod compose_tests {
    use super::*;

    #[test]
    fn test_partial_pipelines_carry_origin() {
        let mut main = CruiseConfig::new();
        main.add_pipeline("local", PipelineConfig::new("local_pipeline"));
        let p = partial("https://example.com/a.git", "r7", &["remote_pipeline"]);

        let effective = compose_effective(&main, &[p.clone()]);

        assert_eq!(
            effective.all_pipeline_names(),
            vec!["local_pipeline", "remote_pipeline"]
        );
        assert!(effective.pipeline_named("local_pipeline").unwrap().origin.is_local());
        assert_eq!(
            effective.pipeline_named("remote_pipeline").unwrap().origin,
            ConfigOrigin::Repo(p.origin)
        );
    }

    #[test]
    fn test_same_named_groups_merge() {
        let mut main = CruiseConfig::new();
        main.add_pipeline("Remote", PipelineConfig::new("local_pipeline"));
        let p = partial("https://example.com/a.git", "r1", &["remote_pipeline"]);

        let effective = compose_effective(&main, &[p]);

        assert_eq!(effective.pipeline_groups.len(), 1);
        assert_eq!(effective.pipeline_groups[0].pipelines.len(), 2);
    }

    #[test]
    fn test_same_named_environments_merge() {
        let mut main = CruiseConfig::new();
        let mut env = EnvironmentConfig::new("uat");
        env.pipelines.push("local".to_string());
        env.variables.insert("A".to_string(), "main".to_string());
        main.environments.push(env);

        let mut p = partial("https://example.com/a.git", "r1", &["remote"]);
        let mut remote_env = EnvironmentConfig::new("UAT");
        remote_env.pipelines.push("remote".to_string());
        remote_env.agents.push("agent-1".to_string());
        remote_env.variables.insert("A".to_string(), "partial".to_string());
        remote_env.variables.insert("B".to_string(), "partial".to_string());
        p.environments.push(remote_env);

        let effective = compose_effective(&main, &[p]);

        assert_eq!(effective.environments.len(), 1);
        let env = &effective.environments[0];
        assert_eq!(env.pipelines, vec!["local", "remote"]);
        assert_eq!(env.agents, vec!["agent-1"]);
        assert_eq!(env.variables["A"], "main");
        assert_eq!(env.variables["B"], "partial");
    }

    #[test]
    fn test_main_document_is_not_modified() {
        let main = CruiseConfig::new();
        let p = partial("https://example.com/a.git", "r1", &["remote"]);

        let _ = compose_effective(&main, &[p]);

        assert_eq!(main, CruiseConfig::new());
    }
}
