//! Compiles an execution order into barrier-separated stages.

use super::{Plan, Stage};
use crate::config::CompilerConfig;
use crate::dependency::{Dependency, DependencyType, KindPriorityRule};
use crate::error::PlanError;
use crate::graph::GraphResult;
use crate::manifest::ManifestRef;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, instrument};

/// Names a stage after the distinct kinds it holds: `stage-Server_Service`.
pub fn stage_name<'a>(kinds: impl IntoIterator<Item = &'a str>) -> String {
    let kinds: BTreeSet<&str> = kinds.into_iter().collect();
    let joined: Vec<&str> = kinds.into_iter().collect();
    format!("stage-{}", joined.join("_"))
}

/// Compiles a graph with the default kind priorities and configuration.
pub fn compile(graph: &GraphResult, manifests: &[ManifestRef]) -> Result<Plan, PlanError> {
    PlanCompiler::default().compile_graph(graph, manifests)
}

#[derive(Default)]
struct OpenStage<'a> {
    kinds: Vec<&'a str>,
    ids: Vec<String>,
}

impl OpenStage<'_> {
    fn accepts(&self, kind: &str, priorities: &KindPriorityRule) -> bool {
        self.kinds.iter().all(|k| priorities.same_affinity(k, kind))
    }
}

/// Groups an execution order into stages.
///
/// A new stage opens whenever the next manifest's kind does not share an
/// affinity group with the open stage, or when one of its explicit
/// dependencies is still in the open stage.
#[derive(Debug, Clone, Default)]
pub struct PlanCompiler {
    priorities: KindPriorityRule,
    config: CompilerConfig,
}

impl PlanCompiler {
    pub fn new(priorities: KindPriorityRule, config: CompilerConfig) -> Self {
        Self { priorities, config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compiles the execution order of a built graph.
    pub fn compile_graph(
        &self,
        graph: &GraphResult,
        manifests: &[ManifestRef],
    ) -> Result<Plan, PlanError> {
        let by_id: HashMap<String, ManifestRef> = manifests
            .iter()
            .map(|m| (m.id(), ManifestRef::clone(m)))
            .collect();
        self.compile(&graph.execution_order, &by_id, &graph.dependencies)
    }

    /// Compiles `order`, which must already be dependency-sorted.
    #[instrument(skip_all, fields(manifests = order.len()))]
    pub fn compile(
        &self,
        order: &[String],
        manifests: &HashMap<String, ManifestRef>,
        dependencies: &[Dependency],
    ) -> Result<Plan, PlanError> {
        let mut requires: HashMap<&str, Vec<&str>> = HashMap::new();
        for dependency in dependencies {
            if dependency.dependency_type == DependencyType::Explicit
                && dependency.from_base() != dependency.to_base()
            {
                requires
                    .entry(dependency.from_base())
                    .or_default()
                    .push(dependency.to_base());
            }
        }

        let mut stages: Vec<Stage> = Vec::new();
        let mut closed: HashSet<String> = HashSet::new();
        let mut open = OpenStage::default();

        for id in order {
            let manifest = manifests.get(id).ok_or_else(|| PlanError::UnknownManifest {
                stage: stages.len(),
                id: id.clone(),
            })?;
            let kind = manifest.kind();

            let blocked = requires
                .get(id.as_str())
                .is_some_and(|deps| deps.iter().any(|dep| !closed.contains(*dep)));

            if !open.ids.is_empty() && (blocked || !open.accepts(kind, &self.priorities)) {
                debug!(manifest_id = %id, kind, blocked, "Opening new stage");
                let finished = std::mem::take(&mut open);
                closed.extend(finished.ids.iter().cloned());
                stages.push(self.close(finished));
            }

            if !open.kinds.contains(&kind) {
                open.kinds.push(kind);
            }
            open.ids.push(id.clone());
        }

        if !open.ids.is_empty() {
            stages.push(self.close(open));
        }

        debug!(stages = stages.len(), "Compiled plan");
        Ok(Plan::new(stages))
    }

    fn close(&self, open: OpenStage<'_>) -> Stage {
        let mut ids = open.ids;
        if self.config.stable_sort {
            ids.sort();
        }
        let parallel = ids.len() >= self.config.parallel_threshold;
        let stage = Stage::new(stage_name(open.kinds.iter().copied()), ids);
        if parallel { stage.parallel() } else { stage }
    }
}
