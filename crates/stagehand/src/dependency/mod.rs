//! Dependency rule engine.
//!
//! Rules inspect one manifest at a time and emit [`Dependency`] edges. The
//! [`GraphBuilder`](crate::graph::GraphBuilder) applies every rule in a
//! [`RuleRegistry`] whose `can_handle` accepts a manifest and flattens the
//! results.
//!
//! Edges point from the dependent (`from`) to the dependency (`to`):
//! `from` needs `to`.

pub mod explicit;
pub mod intra_case;
pub mod priority;
pub mod template;

pub use explicit::ExplicitDependencyRule;
pub use intra_case::IntraCaseRule;
pub use priority::{DEFAULT_PRIORITY, KIND_PRIORITY_RULE, KindPriorityRule};
pub use template::{TemplateRef, TemplateReferenceRule, extract_references};

use crate::error::GraphError;
use crate::manifest::{Manifest, ManifestRef, kinds};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How a dependency was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DependencyType {
    /// Declared through `dependsOn`. The only kind that gates ordering.
    Explicit,
    /// Inferred from a `{{ alias.path }}` reference to another manifest.
    Template,
    /// A case referencing another case of the same manifest.
    IntraCase,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyMetadata {
    /// The alias (or alias-qualified ID) the edge was discovered through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Output paths the dependent reads from the dependency.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Whether the dependency must retain its output for the dependent.
    #[serde(default)]
    pub save: bool,
}

/// A directed edge: `from` depends on `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub dependency_type: DependencyType,
    #[serde(default)]
    pub metadata: DependencyMetadata,
}

impl Dependency {
    pub fn explicit(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            dependency_type: DependencyType::Explicit,
            metadata: DependencyMetadata::default(),
        }
    }

    pub fn template(
        from: impl Into<String>,
        to: impl Into<String>,
        alias: impl Into<String>,
        paths: Vec<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            dependency_type: DependencyType::Template,
            metadata: DependencyMetadata {
                alias: Some(alias.into()),
                paths,
                save: true,
            },
        }
    }

    pub fn intra_case(
        from: impl Into<String>,
        to: impl Into<String>,
        alias: impl Into<String>,
        paths: Vec<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            dependency_type: DependencyType::IntraCase,
            metadata: DependencyMetadata {
                alias: Some(alias.into()),
                paths,
                save: true,
            },
        }
    }

    /// Base manifest ID of the dependent.
    pub fn from_base(&self) -> &str {
        crate::manifest::base_id(&self.from)
    }

    /// Base manifest ID of the dependency.
    pub fn to_base(&self) -> &str {
        crate::manifest::base_id(&self.to)
    }

    /// True when both ends name the same node (after alias resolution).
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    /// True when both ends live in the same manifest.
    pub fn is_intra_manifest(&self) -> bool {
        self.from_base() == self.to_base()
    }
}

/// Where an alias was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTarget {
    pub manifest_id: String,
    /// Case index, `None` for a manifest-level alias.
    pub case: Option<usize>,
}

impl AliasTarget {
    fn location(&self) -> String {
        match self.case {
            Some(index) => format!("{}/cases[{index}]", self.manifest_id),
            None => self.manifest_id.clone(),
        }
    }
}

/// Alias and ID lookup shared by every rule during one graph build.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    aliases: BTreeMap<String, AliasTarget>,
    manifest_ids: BTreeSet<String>,
    values_manifests: Vec<String>,
}

impl AliasIndex {
    /// Collects manifest IDs and aliases, rejecting duplicates.
    pub fn build(manifests: &[ManifestRef]) -> Result<Self, GraphError> {
        let mut index = Self::default();

        for manifest in manifests {
            let id = manifest.id();
            if !index.manifest_ids.insert(id.clone()) {
                return Err(GraphError::DuplicateManifest { id });
            }
            if manifest.kind() == kinds::VALUES {
                index.values_manifests.push(id.clone());
            }

            if let Some(alias) = manifest.alias() {
                index.insert(
                    alias,
                    AliasTarget {
                        manifest_id: id.clone(),
                        case: None,
                    },
                )?;
            }
            for case in manifest.cases() {
                if let Some(alias) = case.alias {
                    index.insert(
                        alias,
                        AliasTarget {
                            manifest_id: id.clone(),
                            case: Some(case.index),
                        },
                    )?;
                }
            }
        }

        index.values_manifests.sort();
        Ok(index)
    }

    fn insert(&mut self, alias: &str, target: AliasTarget) -> Result<(), GraphError> {
        if let Some(existing) = self.aliases.get(alias) {
            return Err(GraphError::DuplicateAlias {
                alias: alias.to_string(),
                first: existing.location(),
                second: target.location(),
            });
        }
        self.aliases.insert(alias.to_string(), target);
        Ok(())
    }

    /// Resolves an alias to the manifest that declares it.
    pub fn resolve(&self, alias: &str) -> Option<&AliasTarget> {
        self.aliases.get(alias)
    }

    pub fn contains_manifest(&self, id: &str) -> bool {
        self.manifest_ids.contains(id)
    }

    /// IDs of every `Values` manifest, sorted.
    pub fn values_manifests(&self) -> &[String] {
        &self.values_manifests
    }

    /// Alias to manifest ID map.
    pub fn alias_to_manifest(&self) -> BTreeMap<String, String> {
        self.aliases
            .iter()
            .map(|(alias, target)| (alias.clone(), target.manifest_id.clone()))
            .collect()
    }
}

/// A pluggable dependency extraction rule.
pub trait DependencyRule: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, manifest: &dyn Manifest) -> bool;

    fn analyze(
        &self,
        manifest: &dyn Manifest,
        index: &AliasIndex,
    ) -> Result<Vec<Dependency>, GraphError>;

    /// Position of the rule in a registry; lower runs first.
    fn priority(&self) -> i32 {
        0
    }
}

/// Ordered set of rules plus the kind priority lookup used for tie-breaking.
#[derive(Clone)]
pub struct RuleRegistry {
    rules: Vec<Arc<dyn DependencyRule>>,
    priorities: Arc<KindPriorityRule>,
}

impl RuleRegistry {
    /// Creates a registry with no rules and the default kind priorities.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            priorities: Arc::new(KindPriorityRule::default()),
        }
    }

    /// Creates a registry with the built-in rules.
    ///
    /// The kind priority rule is registered from the same table that
    /// [`priorities`](Self::priorities) returns.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let priorities: Arc<dyn DependencyRule> = registry.priorities.clone();
        registry.register_arc(priorities);
        registry.register(ExplicitDependencyRule);
        registry.register(TemplateReferenceRule);
        registry.register(IntraCaseRule);
        registry
    }

    /// Adds a rule, keeping the list sorted by rule priority (stable for ties).
    pub fn register(&mut self, rule: impl DependencyRule + 'static) {
        self.register_arc(Arc::new(rule));
    }

    pub fn register_arc(&mut self, rule: Arc<dyn DependencyRule>) {
        let position = self
            .rules
            .iter()
            .position(|existing| existing.priority() > rule.priority())
            .unwrap_or(self.rules.len());
        self.rules.insert(position, rule);
    }

    /// Replaces the kind priority table, including a registered priority rule.
    pub fn with_priorities(mut self, priorities: KindPriorityRule) -> Self {
        let priorities = Arc::new(priorities);
        for rule in &mut self.rules {
            if rule.name() == KIND_PRIORITY_RULE {
                *rule = Arc::clone(&priorities) as Arc<dyn DependencyRule>;
            }
        }
        self.priorities = priorities;
        self
    }

    pub fn priorities(&self) -> &KindPriorityRule {
        &self.priorities
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn DependencyRule> {
        self.rules.iter().map(|rule| rule.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Runs every applicable rule over one manifest.
    ///
    /// Fails immediately on a self-referencing edge.
    pub fn analyze(
        &self,
        manifest: &dyn Manifest,
        index: &AliasIndex,
    ) -> Result<Vec<Dependency>, GraphError> {
        let mut dependencies = Vec::new();
        for rule in &self.rules {
            if !rule.can_handle(manifest) {
                continue;
            }
            for dependency in rule.analyze(manifest, index)? {
                if dependency.is_self_loop() {
                    return Err(GraphError::SelfDependency {
                        id: dependency.from,
                        rule: rule.name().to_string(),
                    });
                }
                dependencies.push(dependency);
            }
        }
        Ok(dependencies)
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.names())
            .field("priorities", &self.priorities)
            .finish()
    }
}
