//! Cache of partial configurations and composition of the effective
//! configuration.
//!
//! Config repositories contribute [`PartialConfig`] fragments. Each fragment
//! is first cached as *last known*; it becomes *last valid* only after an
//! effective configuration containing it passed validation and was saved.
//! When a newer fragment breaks validation, the last valid one stays in use.
//!
//! Both maps are keyed by the fingerprint of the config repository.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::model::{name_key, ConfigOrigin, CruiseConfig, PartialConfig};

#[cfg(test)]
#[path = "partials_tests.rs"]
mod tests;

/// Thread-safe store of last known and last valid partials.
#[derive(Debug, Default)]
pub struct PartialConfigCache {
    known: RwLock<HashMap<String, PartialConfig>>,
    valid: RwLock<HashMap<String, PartialConfig>>,
}

impl PartialConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the newest partial received for a config repository.
    pub fn cache_as_last_known(&self, fingerprint: &str, partial: PartialConfig) {
        debug!(
            fingerprint,
            revision = %partial.origin.revision,
            "Caching partial as last known"
        );
        self.known
            .write()
            .unwrap()
            .insert(fingerprint.to_string(), partial);
    }

    /// Promotes a partial to last valid.
    pub fn mark_as_valid(&self, fingerprint: &str, partial: PartialConfig) {
        info!(
            fingerprint,
            revision = %partial.origin.revision,
            "Partial marked as valid"
        );
        self.valid
            .write()
            .unwrap()
            .insert(fingerprint.to_string(), partial);
    }

    /// Promotes every last known partial to last valid.
    pub fn mark_all_known_as_valid(&self) {
        let known = self.known.read().unwrap().clone();
        let mut valid = self.valid.write().unwrap();
        for (fingerprint, partial) in known {
            valid.insert(fingerprint, partial);
        }
    }

    /// Last known partials, sorted by fingerprint.
    pub fn last_known_partials(&self) -> Vec<PartialConfig> {
        sorted(&self.known.read().unwrap())
    }

    /// Last valid partials, sorted by fingerprint.
    pub fn last_valid_partials(&self) -> Vec<PartialConfig> {
        sorted(&self.valid.read().unwrap())
    }

    pub fn get_known(&self, fingerprint: &str) -> Option<PartialConfig> {
        self.known.read().unwrap().get(fingerprint).cloned()
    }

    pub fn get_valid(&self, fingerprint: &str) -> Option<PartialConfig> {
        self.valid.read().unwrap().get(fingerprint).cloned()
    }

    pub fn remove_known(&self, fingerprint: &str) -> Option<PartialConfig> {
        self.known.write().unwrap().remove(fingerprint)
    }

    pub fn remove_valid(&self, fingerprint: &str) -> Option<PartialConfig> {
        self.valid.write().unwrap().remove(fingerprint)
    }

    /// Drops entries of config repositories that are no longer declared.
    pub fn retain(&self, fingerprints: &[String]) {
        let keep = |fingerprint: &String| fingerprints.contains(fingerprint);

        let mut known = self.known.write().unwrap();
        let before = known.len();
        known.retain(|fingerprint, _| keep(fingerprint));
        let dropped_known = before - known.len();
        drop(known);

        let mut valid = self.valid.write().unwrap();
        let before = valid.len();
        valid.retain(|fingerprint, _| keep(fingerprint));
        let dropped_valid = before - valid.len();

        if dropped_known + dropped_valid > 0 {
            info!(
                dropped_known,
                dropped_valid, "Dropped partials of undeclared config repositories"
            );
        }
    }

    pub fn clear(&self) {
        self.known.write().unwrap().clear();
        self.valid.write().unwrap().clear();
    }
}

fn sorted(partials: &HashMap<String, PartialConfig>) -> Vec<PartialConfig> {
    let mut entries: Vec<_> = partials.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter().map(|(_, p)| p.clone()).collect()
}

/// Composes the main document and the given partials into the effective
/// configuration.
///
/// Groups with the same name merge their pipelines. Environments with the
/// same name merge their pipelines, agents and variables. Every pipeline of
/// a partial carries the partial's origin.
pub fn compose_effective(main: &CruiseConfig, partials: &[PartialConfig]) -> CruiseConfig {
    let mut effective = main.clone();

    for partial in partials {
        let origin = ConfigOrigin::Repo(partial.origin.clone());

        for group in &partial.pipeline_groups {
            for pipeline in &group.pipelines {
                let mut pipeline = pipeline.clone();
                pipeline.origin = origin.clone();
                effective.add_pipeline(&group.name, pipeline);
            }
        }

        for environment in &partial.environments {
            let existing = effective
                .environments
                .iter_mut()
                .find(|e| name_key(&e.name) == name_key(&environment.name));

            match existing {
                Some(existing) => {
                    extend_unique(&mut existing.pipelines, &environment.pipelines);
                    extend_unique(&mut existing.agents, &environment.agents);
                    for (name, value) in &environment.variables {
                        existing
                            .variables
                            .entry(name.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
                None => effective.environments.push(environment.clone()),
            }
        }
    }

    effective
}

fn extend_unique(target: &mut Vec<String>, additions: &[String]) {
    for item in additions {
        if !target.iter().any(|t| t.eq_ignore_ascii_case(item)) {
            target.push(item.clone());
        }
    }
}
