//! Configuration for plan compilation and execution.

use serde::{Deserialize, Serialize};

/// Configuration for [`PlanRunner`](crate::runner::PlanRunner).
///
/// # Examples
///
/// ```
/// use stagehand::config::RunnerConfig;
///
/// let config = RunnerConfig::new().with_max_concurrent_tasks(4);
/// assert_eq!(config.max_concurrent_tasks, Some(4));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Maximum number of manifests a parallel stage runs at once.
    ///
    /// If `None`, every manifest of a parallel stage starts immediately.
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency bound. Zero is treated as one.
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = Some(max.max(1));
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.max_concurrent_tasks = None;
        self
    }
}

/// Configuration for the plan compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Sort manifest IDs inside each compiled stage.
    ///
    /// **Default:** `true`
    #[serde(default = "default_true")]
    pub stable_sort: bool,

    /// Minimum stage size for a compiled stage to be marked parallel.
    ///
    /// **Default:** `2`
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

fn default_true() -> bool {
    true
}

fn default_parallel_threshold() -> usize {
    2
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self {
            stable_sort: default_true(),
            parallel_threshold: default_parallel_threshold(),
        }
    }

    pub fn with_stable_sort(mut self, enabled: bool) -> Self {
        self.stable_sort = enabled;
        self
    }

    /// Sets the parallel threshold. `usize::MAX` compiles every stage as strict.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Compiles every stage as strict.
    pub fn strict(self) -> Self {
        self.with_parallel_threshold(usize::MAX)
    }
}
