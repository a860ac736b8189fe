//! Kind-based scheduling priority.
//!
//! Priorities only break ties between manifests that are ready at the same
//! time; they never override a dependency edge.

use super::{AliasIndex, Dependency, DependencyRule};
use crate::error::GraphError;
use crate::manifest::{Manifest, kinds};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registered name of [`KindPriorityRule`].
pub const KIND_PRIORITY_RULE: &str = "kind-priority";

/// Priority assigned to kinds missing from the table. Sorts them last.
pub const DEFAULT_PRIORITY: i32 = 1000;

/// Kind to priority lookup. Lower runs earlier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPriorityRule {
    priorities: HashMap<String, i32>,
    default_priority: i32,
}

impl KindPriorityRule {
    /// Creates an empty table where every kind gets `default_priority`.
    pub fn new(default_priority: i32) -> Self {
        Self {
            priorities: HashMap::new(),
            default_priority,
        }
    }

    pub fn with_priority(mut self, kind: impl Into<String>, priority: i32) -> Self {
        self.priorities.insert(kind.into(), priority);
        self
    }

    pub fn priority_of(&self, kind: &str) -> i32 {
        self.priorities
            .get(kind)
            .copied()
            .unwrap_or(self.default_priority)
    }

    pub fn is_known(&self, kind: &str) -> bool {
        self.priorities.contains_key(kind)
    }

    /// Whether two kinds may share a compiled stage.
    ///
    /// Known kinds with equal priority share an affinity group (servers and
    /// services start together); an unknown kind only groups with itself.
    pub fn same_affinity(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        self.is_known(a) && self.is_known(b) && self.priority_of(a) == self.priority_of(b)
    }
}

impl Default for KindPriorityRule {
    fn default() -> Self {
        Self::new(DEFAULT_PRIORITY)
            .with_priority(kinds::VALUES, 0)
            .with_priority(kinds::SERVER, 10)
            .with_priority(kinds::SERVICE, 10)
            .with_priority(kinds::HTTP_TEST, 20)
            .with_priority(kinds::LOAD_TEST, 30)
    }
}

/// Contributes no edges. Registered so every built-in rule goes through the
/// same registry; the graph builder reads the table via
/// [`RuleRegistry::priorities`](super::RuleRegistry::priorities).
impl DependencyRule for KindPriorityRule {
    fn name(&self) -> &str {
        KIND_PRIORITY_RULE
    }

    fn can_handle(&self, _manifest: &dyn Manifest) -> bool {
        true
    }

    fn analyze(
        &self,
        _manifest: &dyn Manifest,
        _index: &AliasIndex,
    ) -> Result<Vec<Dependency>, GraphError> {
        Ok(Vec::new())
    }

    fn priority(&self) -> i32 {
        -10
    }
}
