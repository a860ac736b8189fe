//! Declared (`dependsOn`) dependencies.

use super::{AliasIndex, Dependency, DependencyRule};
use crate::error::GraphError;
use crate::manifest::{Manifest, base_id};

/// Emits one `Explicit` edge per `dependsOn` entry.
///
/// Entries may be manifest IDs, case-qualified IDs, or aliases.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitDependencyRule;

impl ExplicitDependencyRule {
    fn resolve(entry: &str, index: &AliasIndex) -> Option<(String, bool)> {
        if index.contains_manifest(entry) {
            return Some((entry.to_string(), false));
        }
        if let Some(target) = index.resolve(entry) {
            return Some((target.manifest_id.clone(), true));
        }
        let base = base_id(entry);
        if base != entry && index.contains_manifest(base) {
            return Some((base.to_string(), true));
        }
        None
    }
}

impl DependencyRule for ExplicitDependencyRule {
    fn name(&self) -> &str {
        "explicit"
    }

    fn can_handle(&self, manifest: &dyn Manifest) -> bool {
        !manifest.depends_on().is_empty()
    }

    fn analyze(
        &self,
        manifest: &dyn Manifest,
        index: &AliasIndex,
    ) -> Result<Vec<Dependency>, GraphError> {
        let id = manifest.id();
        let mut dependencies: Vec<Dependency> = Vec::new();

        for entry in manifest.depends_on() {
            let (target, via_alias) =
                Self::resolve(entry, index).ok_or_else(|| GraphError::MissingDependency {
                    from: id.clone(),
                    to: entry.clone(),
                })?;

            if dependencies.iter().any(|dep| dep.to == target) {
                continue;
            }

            let mut dependency = Dependency::explicit(id.clone(), target);
            if via_alias {
                dependency.metadata.alias = Some(entry.clone());
            }
            dependencies.push(dependency);
        }

        Ok(dependencies)
    }

    fn priority(&self) -> i32 {
        0
    }
}
