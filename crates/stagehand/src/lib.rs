//! `stagehand` - dependency inference, staged plans, and a concurrent plan
//! runner for manifest-driven test environments.
//!
//! The pipeline has three steps:
//!
//! 1. [`graph::GraphBuilder`] runs the [`dependency`] rules over a manifest set
//!    and produces a [`graph::GraphResult`]: inter- and intra-manifest edges,
//!    save requirements, and a deterministic execution order.
//! 2. [`plan::PlanCompiler`] groups that order into barrier-separated
//!    [`plan::Stage`]s. Hand-written plans are validated with
//!    [`plan::check_plan`].
//! 3. [`runner::PlanRunner`] executes a [`plan::Plan`] against per-kind
//!    [`runner::Executor`]s, sharing results through an
//!    [`context::ExecutionContext`].
//!
//! ```
//! use stagehand::config::CompilerConfig;
//! use stagehand::dependency::RuleRegistry;
//! use stagehand::manifest::{ManifestDocument, TestCase, kinds};
//!
//! let manifests = vec![
//!     ManifestDocument::new(kinds::SERVER, "api").with_alias("api").into_ref(),
//!     ManifestDocument::new(kinds::HTTP_TEST, "smoke")
//!         .with_dependency("api")
//!         .with_case(TestCase::new("health").with_endpoint("{{ api.url }}/health"))
//!         .into_ref(),
//! ];
//!
//! let (graph, plan) =
//!     stagehand::prepare(&manifests, RuleRegistry::default(), CompilerConfig::default()).unwrap();
//!
//! assert!(graph.save_requirement("default.Server.api").unwrap().required);
//! assert_eq!(plan.stages.len(), 2);
//! assert_eq!(plan.stages[0].name, "stage-Server");
//! ```

pub mod config;
pub mod context;
pub mod dependency;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod observability;
pub mod plan;
pub mod runner;
pub mod value;

pub use config::{CompilerConfig, RunnerConfig};
pub use context::ExecutionContext;
pub use dependency::{Dependency, DependencyRule, DependencyType, RuleRegistry};
pub use error::{ContextError, Error, GraphError, PlanError, Result, RunError};
pub use graph::{GraphBuilder, GraphResult, SaveRequirement};
pub use manifest::{Manifest, ManifestDocument, ManifestRef};
pub use plan::{Plan, PlanCompiler, PlanDocument, Stage, check_plan};
pub use runner::{Executor, ExecutorRegistry, PlanRunner};
pub use value::{Value, ValueType};

/// Builds the dependency graph and compiles it into a plan.
///
/// The compiler uses the kind priorities held by `registry`.
pub fn prepare(
    manifests: &[ManifestRef],
    registry: RuleRegistry,
    config: CompilerConfig,
) -> Result<(GraphResult, Plan)> {
    let compiler = PlanCompiler::new(registry.priorities().clone(), config);
    let graph = GraphBuilder::new(registry).build(manifests)?;
    let plan = compiler.compile_graph(&graph, manifests)?;
    Ok((graph, plan))
}
