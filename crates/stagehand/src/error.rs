//! Error types for graph construction, plan validation, and plan execution.

use thiserror::Error;

/// Errors raised while extracting dependencies or ordering the manifest graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A rule produced an edge whose both ends resolve to the same node.
    #[error("Manifest {id} depends on itself (reported by rule '{rule}')")]
    SelfDependency { id: String, rule: String },

    /// The explicit dependency subgraph contains a cycle.
    ///
    /// `ids` lists every manifest whose in-degree never reached zero.
    #[error("Cyclic dependency detected among: {}", .ids.join(", "))]
    Cycle { ids: Vec<String> },

    /// The same alias was declared in two places.
    #[error("Alias '{alias}' is declared twice: {first} and {second}")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },

    /// Two manifests share one ID.
    #[error("Manifest {id} is declared more than once")]
    DuplicateManifest { id: String },

    /// An explicit dependency names neither a known manifest nor a known alias.
    #[error("Manifest {from} depends on unknown manifest or alias '{to}'")]
    MissingDependency { from: String, to: String },

    /// A rule failed for a reason of its own.
    #[error("Rule '{rule}' failed: {message}")]
    Rule { rule: String, message: String },
}

/// Errors raised by [`check_plan`](crate::plan::check_plan) and plan document handling.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Stage {stage} references unknown manifest {id}")]
    UnknownManifest { stage: usize, id: String },

    #[error("Manifest {id} appears in stage {first_stage} and again in stage {second_stage}")]
    DuplicateManifest {
        id: String,
        first_stage: usize,
        second_stage: usize,
    },

    /// A dependent is scheduled in the same or an earlier stage than its dependency.
    #[error(
        "Manifest {dependent} (stage {dependent_stage}) must run after {dependency} (stage {dependency_stage})"
    )]
    OrderViolation {
        dependent: String,
        dependent_stage: usize,
        dependency: String,
        dependency_stage: usize,
    },

    /// A scheduled manifest explicitly depends on a manifest the plan never runs.
    #[error("Manifest {dependent} (stage {dependent_stage}) depends on {dependency}, which no stage schedules")]
    UnscheduledDependency {
        dependent: String,
        dependent_stage: usize,
        dependency: String,
    },

    #[error("Dependency resolution failed: {0}")]
    Graph(#[from] GraphError),

    #[error("Plan document error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid plan document: {0}")]
    InvalidDocument(String),
}

/// Errors raised by the [`ExecutionContext`](crate::context::ExecutionContext) stores.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContextError {
    #[error("No value stored under key '{key}'")]
    NotFound { key: String },

    #[error("Value under key '{key}' is {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Pass value '{key}' was already resolved")]
    AlreadyResolved { key: String },

    #[error("Run cancelled")]
    Cancelled,
}

/// Errors raised while running a plan.
#[derive(Debug, Error)]
pub enum RunError {
    /// No executor is registered for a manifest kind. Never retried.
    #[error("No executor registered for kind '{kind}' (manifest {id})")]
    ExecutorNotFound { kind: String, id: String },

    #[error("Manifest {id} is not loaded in the execution context")]
    ManifestNotFound { id: String },

    /// An executor returned an error.
    #[error("Manifest {id} failed: {source:#}")]
    Execution {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A lifecycle hook failed. Fatal to its enclosing stage or plan.
    #[error("{event} hook failed for {scope}: {message}")]
    Hook {
        scope: String,
        event: String,
        message: String,
    },

    #[error("Run cancelled")]
    Cancelled,

    /// Every error collected from a parallel stage.
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<RunError>),
}

impl RunError {
    /// Wraps an executor failure with the manifest it was running.
    pub fn execution(id: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Execution {
            id: id.into(),
            source,
        }
    }

    /// Creates a hook failure for the given scope ("plan" or a stage name).
    pub fn hook(
        scope: impl Into<String>,
        event: impl std::fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::Hook {
            scope: scope.into(),
            event: event.to_string(),
            message: message.into(),
        }
    }

    /// Joins several errors into one. A single error is returned unwrapped,
    /// and a set made only of cancellations collapses to [`RunError::Cancelled`].
    pub fn join(mut errors: Vec<RunError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ if errors
                .iter()
                .flat_map(RunError::leaves)
                .all(|e| matches!(e, Self::Cancelled)) =>
            {
                Some(Self::Cancelled)
            }
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Returns true when this error, or any error it aggregates, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Aggregate(errors) => errors.iter().any(RunError::is_cancelled),
            _ => false,
        }
    }

    /// Flattens nested aggregates into their leaf errors.
    pub fn leaves(&self) -> Vec<&RunError> {
        match self {
            Self::Aggregate(errors) => errors.iter().flat_map(RunError::leaves).collect(),
            other => vec![other],
        }
    }
}

fn join_messages(errors: &[RunError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Crate-level error wrapping every error family.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Run(#[from] RunError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
