//! Case-to-case references inside one manifest.

use super::template::{group_by_alias, scan_manifest};
use super::{AliasIndex, Dependency, DependencyRule};
use crate::error::GraphError;
use crate::manifest::{CaseInfo, Manifest, case_id};
use std::collections::BTreeMap;

/// Node name of a case: `manifest#alias`, or `manifest#cases[i]` when the
/// case has no alias. The indexed form never collides with an alias.
fn case_node(manifest_id: &str, case: &CaseInfo<'_>) -> String {
    match case.alias {
        Some(alias) => case_id(manifest_id, alias),
        None => case_id(manifest_id, &format!("cases[{}]", case.index)),
    }
}

/// Emits `IntraCase` dependencies on cases of the same manifest.
///
/// The producer end is always `manifest#alias`. The consumer end is the
/// consuming case's node, or the bare manifest ID for manifest-level fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntraCaseRule;

impl DependencyRule for IntraCaseRule {
    fn name(&self) -> &str {
        "intra-case"
    }

    fn can_handle(&self, manifest: &dyn Manifest) -> bool {
        manifest.cases().iter().any(|case| case.alias.is_some())
    }

    fn analyze(
        &self,
        manifest: &dyn Manifest,
        _index: &AliasIndex,
    ) -> Result<Vec<Dependency>, GraphError> {
        let id = manifest.id();
        let cases = manifest.cases();
        let producers: BTreeMap<&str, usize> = cases
            .iter()
            .filter_map(|case| case.alias.map(|alias| (alias, case.index)))
            .collect();

        let refs = scan_manifest(manifest);
        let mut dependencies = Vec::new();

        let consumers = std::iter::once((None, id.clone())).chain(
            cases
                .iter()
                .map(|case| (Some(case.index), case_node(&id, case))),
        );

        for (scope, consumer) in consumers {
            let own_refs = refs.iter().filter(|r| r.case == scope);

            for (alias, paths) in group_by_alias(own_refs) {
                if !producers.contains_key(alias.as_str()) {
                    continue;
                }
                dependencies.push(Dependency::intra_case(
                    consumer.clone(),
                    case_id(&id, &alias),
                    alias,
                    paths,
                ));
            }
        }

        Ok(dependencies)
    }

    fn priority(&self) -> i32 {
        20
    }
}
