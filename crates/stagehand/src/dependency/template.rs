//! Template reference analysis.
//!
//! Walks a manifest's string-bearing fields for `{{ alias.path }}` references
//! and turns them into `Template` dependencies on the producing manifest.

use super::{AliasIndex, Dependency, DependencyRule};
use crate::error::GraphError;
use crate::manifest::{Manifest, TextField};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use tracing::debug;

/// Alias that always refers to the `Values` manifests of the set.
pub const VALUES_ALIAS: &str = "Values";

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*)((?:\.[A-Za-z0-9_\-]+|\[\d+\])*)\s*(?:\|[^}]*)?\}\}")
        .expect("reference pattern is valid")
});

/// One `{{ alias.path }}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub alias: String,
    /// Dotted path after the alias, empty when the whole output is referenced.
    pub path: String,
    pub location: String,
    pub case: Option<usize>,
}

/// Extracts `(alias, path)` pairs from one string, in order of appearance.
///
/// ```
/// use stagehand::dependency::extract_references;
///
/// let refs = extract_references("Bearer {{ login.body.token }}");
/// assert_eq!(refs, vec![("login".to_string(), "body.token".to_string())]);
/// ```
pub fn extract_references(text: &str) -> Vec<(String, String)> {
    REFERENCE
        .captures_iter(text)
        .map(|caps| {
            let alias = caps[1].to_string();
            let path = caps
                .get(2)
                .map(|m| m.as_str().trim_start_matches('.').to_string())
                .unwrap_or_default();
            (alias, path)
        })
        .collect()
}

/// Collects every reference in a manifest's text fields.
pub fn scan_manifest(manifest: &dyn Manifest) -> Vec<TemplateRef> {
    manifest
        .text_fields()
        .iter()
        .flat_map(scan_field)
        .collect()
}

fn scan_field(field: &TextField<'_>) -> Vec<TemplateRef> {
    extract_references(field.text)
        .into_iter()
        .map(|(alias, path)| TemplateRef {
            alias,
            path,
            location: field.location.clone(),
            case: field.case,
        })
        .collect()
}

/// Groups references by alias, deduplicating and sorting paths.
pub(crate) fn group_by_alias<'a>(
    refs: impl IntoIterator<Item = &'a TemplateRef>,
) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for reference in refs {
        let paths = grouped.entry(reference.alias.clone()).or_default();
        if !reference.path.is_empty() {
            paths.insert(reference.path.clone());
        }
    }
    grouped
        .into_iter()
        .map(|(alias, paths)| (alias, paths.into_iter().collect()))
        .collect()
}

/// Emits one `Template` dependency per (consumer, alias) pair.
///
/// Aliases that resolve to nothing are dropped. Aliases of this manifest's
/// own cases are left to [`IntraCaseRule`](super::IntraCaseRule).
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateReferenceRule;

impl DependencyRule for TemplateReferenceRule {
    fn name(&self) -> &str {
        "template"
    }

    fn can_handle(&self, _manifest: &dyn Manifest) -> bool {
        true
    }

    fn analyze(
        &self,
        manifest: &dyn Manifest,
        index: &AliasIndex,
    ) -> Result<Vec<Dependency>, GraphError> {
        let id = manifest.id();
        let refs = scan_manifest(manifest);
        let own_case_aliases: BTreeSet<&str> =
            manifest.cases().iter().filter_map(|case| case.alias).collect();

        let mut dependencies = Vec::new();
        for (alias, paths) in group_by_alias(&refs) {
            if alias == VALUES_ALIAS {
                for values_id in index.values_manifests() {
                    if *values_id != id {
                        dependencies.push(Dependency::template(
                            id.clone(),
                            values_id.clone(),
                            alias.clone(),
                            paths.clone(),
                        ));
                    }
                }
                continue;
            }

            let Some(target) = index.resolve(&alias) else {
                debug!(manifest_id = %id, alias = %alias, "Dropping unresolved template alias");
                continue;
            };

            if target.manifest_id == id && own_case_aliases.contains(alias.as_str()) {
                continue;
            }

            dependencies.push(Dependency::template(
                id.clone(),
                target.manifest_id.clone(),
                alias,
                paths,
            ));
        }

        Ok(dependencies)
    }

    fn priority(&self) -> i32 {
        10
    }
}
