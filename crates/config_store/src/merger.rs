//! Three-way structural merge of configuration documents.
//!
//! A merge combines two edits of the same *base* document: *ours* (the
//! change being saved) and *theirs* (the latest saved document). The
//! documents are compared element by element rather than line by line.
//!
//! | Element | Identity |
//! |---------|----------|
//! | server settings | single element |
//! | config repository | `id` |
//! | environment | name (case-insensitive) |
//! | pipeline group | name (case-insensitive) |
//! | pipeline | name (case-insensitive), definition and group placement merged separately |
//! | stage | name within its pipeline, when both sides edited the same pipeline |
//!
//! For every element:
//!
//! - unchanged in ours: take theirs
//! - unchanged in theirs: take ours
//! - changed identically: take either
//! - anything else is a conflict naming the element
//!
//! Theirs' ordering is kept; elements only ours added are appended in ours'
//! relative order.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::errors::{ConfigStoreError, ConfigStoreResult};
use crate::model::{name_key, CruiseConfig, PipelineConfig, PipelineGroup};

#[cfg(test)]
#[path = "merger_tests.rs"]
mod tests;

/// Why an element could not be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Divergence(&'static str);

/// Merges concurrent edits of the main configuration document.
#[derive(Debug, Clone, Default)]
pub struct ConfigMerger;

impl ConfigMerger {
    pub fn new() -> Self {
        Self
    }

    /// Merges `ours` and `theirs`, both derived from `base`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigStoreError::MergeConflict` naming the first element
    /// both sides changed differently.
    pub fn merge(
        &self,
        base: &CruiseConfig,
        ours: &CruiseConfig,
        theirs: &CruiseConfig,
    ) -> ConfigStoreResult<CruiseConfig> {
        let server = three_way(Some(&base.server), Some(&ours.server), Some(&theirs.server))
            .map_err(|d| conflict("server settings".to_string(), d))?
            .unwrap_or_else(|| theirs.server.clone());

        let config_repos = merge_keyed(
            &base.config_repos,
            &ours.config_repos,
            &theirs.config_repos,
            |r| r.id.clone(),
            |r| format!("config repo '{}'", r.id),
        )?;

        let environments = merge_keyed(
            &base.environments,
            &ours.environments,
            &theirs.environments,
            |e| name_key(&e.name),
            |e| format!("environment '{}'", e.name),
        )?;

        let pipeline_groups = merge_pipelines(base, ours, theirs)?;

        debug!(
            pipelines = pipeline_groups.iter().map(|g| g.pipelines.len()).sum::<usize>(),
            "Configuration documents merged"
        );

        Ok(CruiseConfig {
            schema_version: theirs.schema_version,
            server,
            config_repos,
            pipeline_groups,
            environments,
        })
    }
}

fn three_way<T: PartialEq + Clone>(
    base: Option<&T>,
    ours: Option<&T>,
    theirs: Option<&T>,
) -> Result<Option<T>, Divergence> {
    if ours == base {
        return Ok(theirs.cloned());
    }
    if theirs == base {
        return Ok(ours.cloned());
    }
    if ours == theirs {
        return Ok(ours.cloned());
    }

    Err(Divergence(match (base, ours, theirs) {
        (None, _, _) => "added with different content on both sides",
        (Some(_), None, _) => "deleted in this change but modified by someone else",
        (Some(_), _, None) => "modified in this change but deleted by someone else",
        _ => "modified on both sides",
    }))
}

fn conflict(element: String, divergence: Divergence) -> ConfigStoreError {
    warn!(element = %element, reason = divergence.0, "Configuration merge conflict");
    ConfigStoreError::MergeConflict {
        element,
        reason: divergence.0.to_string(),
    }
}

fn index_by<'a, T>(items: &'a [T], key: &impl Fn(&T) -> String) -> HashMap<String, &'a T> {
    items.iter().map(|item| (key(item), item)).collect()
}

/// Theirs' keys in order, followed by keys only ours has.
fn ordered_keys<T>(ours: &[T], theirs: &[T], key: &impl Fn(&T) -> String) -> Vec<String> {
    let ours_order: Vec<String> = ours.iter().map(key).collect();
    let theirs_order: Vec<String> = theirs.iter().map(key).collect();
    merged_order(theirs_order, ours_order)
}

fn merged_order(theirs: Vec<String>, ours: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let merged: Vec<String> = theirs
        .into_iter()
        .chain(ours.iter().cloned())
        .filter(|k| seen.insert(k.clone()))
        .collect();

    let kept: Vec<&String> = merged.iter().filter(|k| ours.contains(k)).collect();
    if !kept.iter().copied().eq(ours.iter()) {
        debug!(ours = ?ours, merged = ?kept, "Element order of the stale edit discarded, keeping latest order");
    }
    merged
}

fn merge_keyed<T, K, L>(
    base: &[T],
    ours: &[T],
    theirs: &[T],
    key: K,
    label: L,
) -> ConfigStoreResult<Vec<T>>
where
    T: PartialEq + Clone,
    K: Fn(&T) -> String,
    L: Fn(&T) -> String,
{
    let base_index = index_by(base, &key);
    let ours_index = index_by(ours, &key);
    let theirs_index = index_by(theirs, &key);

    let mut merged = Vec::new();
    for k in ordered_keys(ours, theirs, &key) {
        let b = base_index.get(&k).copied();
        let o = ours_index.get(&k).copied();
        let t = theirs_index.get(&k).copied();

        let resolved = three_way(b, o, t).map_err(|d| {
            let element = t.or(o).or(b).map(&label).unwrap_or(k.clone());
            conflict(element, d)
        })?;

        if let Some(item) = resolved {
            merged.push(item);
        }
    }

    Ok(merged)
}

// ============================================================================
// Pipelines and groups
// ============================================================================

/// A pipeline together with the key of the group holding it.
struct Placed<'a> {
    group: String,
    pipeline: &'a PipelineConfig,
}

fn placements(config: &CruiseConfig) -> (Vec<String>, HashMap<String, Placed<'_>>) {
    let mut order = Vec::new();
    let mut placed = HashMap::new();
    for group in &config.pipeline_groups {
        for pipeline in &group.pipelines {
            let key = name_key(&pipeline.name);
            order.push(key.clone());
            placed.insert(
                key,
                Placed {
                    group: name_key(&group.name),
                    pipeline,
                },
            );
        }
    }
    (order, placed)
}

fn merge_pipelines(
    base: &CruiseConfig,
    ours: &CruiseConfig,
    theirs: &CruiseConfig,
) -> ConfigStoreResult<Vec<PipelineGroup>> {
    let mut groups = group_shells(base, ours, theirs)?;

    let (_, base_placed) = placements(base);
    let (ours_order, ours_placed) = placements(ours);
    let (theirs_order, theirs_placed) = placements(theirs);

    let keys = merged_order(theirs_order, ours_order);

    for key in keys {
        let b = base_placed.get(&key);
        let o = ours_placed.get(&key);
        let t = theirs_placed.get(&key);
        let display = t.or(o).or(b).map(|p| p.pipeline.name.clone()).unwrap_or(key.clone());
        let element = format!("pipeline '{display}'");

        let Some(pipeline) = merge_pipeline_definition(
            &display,
            b.map(|p| p.pipeline),
            o.map(|p| p.pipeline),
            t.map(|p| p.pipeline),
        )?
        else {
            continue;
        };

        let group = three_way(b.map(|p| &p.group), o.map(|p| &p.group), t.map(|p| &p.group))
            .map_err(|_| conflict(element.clone(), Divergence("moved to different groups on both sides")))?
            .or_else(|| o.or(t).map(|p| p.group.clone()))
            .ok_or_else(|| conflict(element.clone(), Divergence("has no pipeline group")))?;

        let Some(target) = groups.iter_mut().find(|g| name_key(&g.name) == group) else {
            return Err(conflict(
                format!("pipeline group '{group}'"),
                Divergence("deleted on one side but still holds pipelines"),
            ));
        };
        target.pipelines.push(pipeline);
    }

    Ok(groups)
}

/// Merges the set of pipeline groups, ignoring their members.
///
/// Membership is resolved per pipeline, so two edits of pipelines in the
/// same group never conflict as a group.
fn group_shells(
    base: &CruiseConfig,
    ours: &CruiseConfig,
    theirs: &CruiseConfig,
) -> ConfigStoreResult<Vec<PipelineGroup>> {
    let shell = |groups: &[PipelineGroup]| -> Vec<PipelineGroup> {
        groups
            .iter()
            .map(|g| PipelineGroup {
                name: g.name.clone(),
                pipelines: Vec::new(),
            })
            .collect()
    };

    merge_keyed(
        &shell(&base.pipeline_groups),
        &shell(&ours.pipeline_groups),
        &shell(&theirs.pipeline_groups),
        |g| name_key(&g.name),
        |g| format!("pipeline group '{}'", g.name),
    )
}

fn merge_pipeline_definition(
    display: &str,
    base: Option<&PipelineConfig>,
    ours: Option<&PipelineConfig>,
    theirs: Option<&PipelineConfig>,
) -> ConfigStoreResult<Option<PipelineConfig>> {
    let element = format!("pipeline '{display}'");

    let divergence = match three_way(base, ours, theirs) {
        Ok(resolved) => return Ok(resolved),
        Err(divergence) => divergence,
    };

    let (Some(base), Some(ours), Some(theirs)) = (base, ours, theirs) else {
        return Err(conflict(element, divergence));
    };

    // Both sides edited the pipeline: merge its header and its stages.
    let header = |p: &PipelineConfig| {
        let mut header = p.clone();
        header.stages.clear();
        header
    };
    let mut merged = three_way(
        Some(&header(base)),
        Some(&header(ours)),
        Some(&header(theirs)),
    )
    .map_err(|d| conflict(element.clone(), d))?
    .unwrap_or_else(|| header(theirs));

    merged.stages = merge_keyed(
        &base.stages,
        &ours.stages,
        &theirs.stages,
        |s| name_key(&s.name),
        |s| format!("stage '{}' of pipeline '{display}'", s.name),
    )?;

    Ok(Some(merged))
}
