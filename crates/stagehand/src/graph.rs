//! Dependency graph construction and execution ordering.
//!
//! The [`GraphBuilder`] runs every rule over a manifest set, separates
//! inter-manifest from intra-manifest edges, derives save requirements, and
//! computes a deterministic execution order with Kahn's algorithm.
//!
//! Only `Explicit` edges between distinct manifests gate the order.
//! `Template` and `IntraCase` edges feed save-requirement bookkeeping only.
//!
//! # Examples
//!
//! ```
//! use stagehand::graph::GraphBuilder;
//! use stagehand::manifest::{ManifestDocument, kinds};
//!
//! let manifests = vec![
//!     ManifestDocument::new(kinds::HTTP_TEST, "smoke")
//!         .with_dependency("default.Server.api")
//!         .into_ref(),
//!     ManifestDocument::new(kinds::SERVER, "api").into_ref(),
//! ];
//!
//! let result = GraphBuilder::default().build(&manifests).unwrap();
//! assert_eq!(result.execution_order, vec!["default.Server.api", "default.HttpTest.smoke"]);
//! ```

use crate::dependency::{AliasIndex, Dependency, DependencyType, RuleRegistry};
use crate::error::GraphError;
use crate::manifest::ManifestRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, instrument};

/// What a producer must retain because consumers read it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequirement {
    pub required: bool,
    pub required_paths: Vec<String>,
    pub consumers: Vec<String>,
}

impl SaveRequirement {
    fn record(&mut self, consumer: &str, paths: &[String]) {
        self.required = true;
        if !self.consumers.iter().any(|c| c == consumer) {
            self.consumers.push(consumer.to_string());
        }
        for path in paths {
            if !self.required_paths.contains(path) {
                self.required_paths.push(path.clone());
            }
        }
    }
}

/// Output of one graph build. Read-only once produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphResult {
    /// Adjacency from a dependency to the manifests that run after it.
    pub graph: BTreeMap<String, Vec<String>>,
    /// Every manifest ID, dependencies first.
    pub execution_order: Vec<String>,
    /// Inter-manifest dependencies.
    pub dependencies: Vec<Dependency>,
    /// Intra-manifest dependencies keyed by base manifest ID.
    pub intra_manifest_deps: BTreeMap<String, Vec<Dependency>>,
    pub save_requirements: BTreeMap<String, SaveRequirement>,
    pub alias_to_manifest: BTreeMap<String, String>,
}

impl GraphResult {
    /// Manifests that run after `id` (any inter-manifest edge type).
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.graph.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Base IDs `id` explicitly depends on, sorted.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        let deps: BTreeSet<&str> = self
            .dependencies
            .iter()
            .filter(|dep| dep.dependency_type == DependencyType::Explicit && dep.from_base() == id)
            .map(Dependency::to_base)
            .collect();
        deps.into_iter().collect()
    }

    pub fn save_requirement(&self, id: &str) -> Option<&SaveRequirement> {
        self.save_requirements.get(id)
    }

    /// Position of each manifest in the execution order.
    pub fn order_index(&self) -> HashMap<&str, usize> {
        self.execution_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect()
    }
}

/// Builds a [`GraphResult`] from a manifest set.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    registry: RuleRegistry,
}

impl GraphBuilder {
    pub fn new(registry: RuleRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Builds the graph. No partial result is returned on error.
    #[instrument(skip_all, fields(manifests = manifests.len()))]
    pub fn build(&self, manifests: &[ManifestRef]) -> Result<GraphResult, GraphError> {
        let index = AliasIndex::build(manifests)?;
        let priorities = self.registry.priorities();

        let nodes: Vec<(i32, String)> = manifests
            .iter()
            .map(|m| (priorities.priority_of(m.kind()), m.id()))
            .collect();

        let mut all_dependencies = Vec::new();
        for manifest in manifests {
            let found = self.registry.analyze(manifest.as_ref(), &index)?;
            debug!(
                manifest_id = %manifest.id(),
                dependencies = found.len(),
                "Analyzed manifest dependencies"
            );
            all_dependencies.extend(found);
        }

        let mut result = GraphResult {
            alias_to_manifest: index.alias_to_manifest(),
            ..Default::default()
        };

        for dependency in all_dependencies {
            if dependency.is_intra_manifest() {
                result
                    .intra_manifest_deps
                    .entry(dependency.from_base().to_string())
                    .or_default()
                    .push(dependency);
            } else {
                result.dependencies.push(dependency);
            }
        }

        for dependency in &result.dependencies {
            let dependents = result
                .graph
                .entry(dependency.to_base().to_string())
                .or_default();
            let dependent = dependency.from_base();
            if !dependents.iter().any(|d| d == dependent) {
                dependents.push(dependent.to_string());
            }
        }

        result.save_requirements = save_requirements(&result);
        result.execution_order = execution_order(&nodes, &result.dependencies)?;

        info!(
            manifests = result.execution_order.len(),
            dependencies = result.dependencies.len(),
            "Built dependency graph"
        );
        Ok(result)
    }
}

fn save_requirements(result: &GraphResult) -> BTreeMap<String, SaveRequirement> {
    let mut requirements: BTreeMap<String, SaveRequirement> = BTreeMap::new();

    for dependency in &result.dependencies {
        if dependency.dependency_type != DependencyType::Template {
            continue;
        }
        requirements
            .entry(dependency.to_base().to_string())
            .or_default()
            .record(dependency.from_base(), &dependency.metadata.paths);
    }

    for (owner, dependencies) in &result.intra_manifest_deps {
        for dependency in dependencies {
            requirements
                .entry(owner.clone())
                .or_default()
                .record(owner, &dependency.metadata.paths);
        }
    }

    requirements
}

/// Kahn's algorithm over explicit edges, ties broken by `(priority, id)`.
fn execution_order(
    nodes: &[(i32, String)],
    dependencies: &[Dependency],
) -> Result<Vec<String>, GraphError> {
    let priority: HashMap<&str, i32> = nodes.iter().map(|(p, id)| (id.as_str(), *p)).collect();
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|(_, id)| (id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, BTreeSet<&str>> = HashMap::new();

    for dependency in dependencies {
        if dependency.dependency_type != DependencyType::Explicit {
            continue;
        }
        let (from, to) = (dependency.from_base(), dependency.to_base());
        if !priority.contains_key(from) || !priority.contains_key(to) {
            continue;
        }
        if dependents.entry(to).or_default().insert(from) {
            if let Some(degree) = in_degree.get_mut(from) {
                *degree += 1;
            }
        }
    }

    let mut ready: BTreeSet<(i32, &str)> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| (priority[id], *id))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some((_, id)) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert((priority[dependent], *dependent));
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let mut ids: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        ids.sort();
        return Err(GraphError::Cycle { ids });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[(i32, &str)]) -> Vec<(i32, String)> {
        ids.iter().map(|(p, id)| (*p, id.to_string())).collect()
    }

    #[test]
    fn test_order_breaks_ties_by_priority_then_id() {
        let order = execution_order(&nodes(&[(20, "c"), (10, "b"), (20, "a"), (0, "z")]), &[]).unwrap();
        assert_eq!(order, vec!["z", "b", "a", "c"]);
    }

    #[test]
    fn test_order_respects_explicit_edges_over_priority() {
        let deps = vec![Dependency::explicit("a", "c")];
        let order = execution_order(&nodes(&[(0, "a"), (50, "c")]), &deps).unwrap();
        assert_eq!(order, vec!["c", "a"]);
    }

    #[test]
    fn test_template_edges_do_not_gate_order() {
        let deps = vec![Dependency::template("a", "c", "c", vec![])];
        let order = execution_order(&nodes(&[(0, "a"), (50, "c")]), &deps).unwrap();
        assert_eq!(order, vec!["a", "c"]);
    }

    #[test]
    fn test_duplicate_edges_count_once() {
        let deps = vec![Dependency::explicit("a", "b"), Dependency::explicit("a", "b")];
        let order = execution_order(&nodes(&[(0, "a"), (0, "b")]), &deps).unwrap();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_cycle_reports_unresolved_ids() {
        let deps = vec![
            Dependency::explicit("a", "b"),
            Dependency::explicit("b", "a"),
            Dependency::explicit("c", "a"),
        ];
        let err = execution_order(&nodes(&[(0, "a"), (0, "b"), (0, "c"), (0, "d")]), &deps)
            .unwrap_err();
        match err {
            GraphError::Cycle { ids } => assert_eq!(ids, vec!["a", "b", "c"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_save_requirement_record_dedups() {
        let mut requirement = SaveRequirement::default();
        requirement.record("x", &["a".to_string(), "b".to_string()]);
        requirement.record("x", &["b".to_string()]);
        assert!(requirement.required);
        assert_eq!(requirement.consumers, vec!["x"]);
        assert_eq!(requirement.required_paths, vec!["a", "b"]);
    }
}
