//! Validation of hand-authored or generated plans.

use super::Plan;
use crate::dependency::{AliasIndex, DependencyRule, ExplicitDependencyRule};
use crate::error::{GraphError, PlanError};
use crate::manifest::ManifestRef;
use std::collections::HashMap;
use tracing::debug;

/// Validates `plan` against a manifest set.
///
/// Fails when a stage references an unknown manifest or a manifest is
/// scheduled twice. Every explicit dependency of a scheduled manifest must be
/// scheduled in a strictly earlier stage.
pub fn check_plan(plan: &Plan, manifests: &[ManifestRef]) -> Result<(), PlanError> {
    let index = AliasIndex::build(manifests)?;
    let by_id: HashMap<String, &ManifestRef> = manifests.iter().map(|m| (m.id(), m)).collect();

    let mut stage_of: HashMap<&str, usize> = HashMap::new();
    for (stage_index, stage) in plan.stages.iter().enumerate() {
        for id in &stage.manifests {
            if !by_id.contains_key(id) {
                return Err(PlanError::UnknownManifest {
                    stage: stage_index,
                    id: id.clone(),
                });
            }
            if let Some(&first_stage) = stage_of.get(id.as_str()) {
                return Err(PlanError::DuplicateManifest {
                    id: id.clone(),
                    first_stage,
                    second_stage: stage_index,
                });
            }
            stage_of.insert(id, stage_index);
        }
    }

    let rule = ExplicitDependencyRule;
    for stage in &plan.stages {
        for id in &stage.manifests {
            let Some(manifest) = by_id.get(id) else {
                continue;
            };
            let dependent_stage = stage_of[id.as_str()];

            for dependency in rule.analyze(manifest.as_ref(), &index)? {
                if dependency.is_self_loop() {
                    return Err(GraphError::SelfDependency {
                        id: id.clone(),
                        rule: rule.name().to_string(),
                    }
                    .into());
                }
                let target = dependency.to_base();
                let Some(&dependency_stage) = stage_of.get(target) else {
                    return Err(PlanError::UnscheduledDependency {
                        dependent: id.clone(),
                        dependent_stage,
                        dependency: target.to_string(),
                    });
                };
                if dependency_stage >= dependent_stage {
                    return Err(PlanError::OrderViolation {
                        dependent: id.clone(),
                        dependent_stage,
                        dependency: target.to_string(),
                        dependency_stage,
                    });
                }
            }
        }
    }

    debug!(stages = plan.stages.len(), "Plan passed validation");
    Ok(())
}
