//! Per-kind executors and their registry.

use crate::context::ExecutionContext;
use crate::manifest::ManifestRef;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Runs manifests of one kind.
///
/// Executors publish results through the context's data store or pass
/// channels. Any returned error fails the manifest; retries are the
/// executor's own business.
///
/// # Examples
///
/// ```
/// use stagehand::context::ExecutionContext;
/// use stagehand::manifest::ManifestRef;
/// use stagehand::runner::Executor;
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl Executor for Echo {
///     async fn run(&self, ctx: &ExecutionContext, manifest: ManifestRef) -> anyhow::Result<()> {
///         ctx.data().set(manifest.id(), manifest.name()).await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, ctx: &ExecutionContext, manifest: ManifestRef) -> anyhow::Result<()>;
}

/// Kind to executor lookup, built once and shared by reference.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor` for `kind`, replacing any previous registration.
    pub fn register(&mut self, kind: impl Into<String>, executor: impl Executor + 'static) {
        self.executors.insert(kind.into(), Arc::new(executor));
    }

    pub fn register_arc(&mut self, kind: impl Into<String>, executor: Arc<dyn Executor>) {
        self.executors.insert(kind.into(), executor);
    }

    pub fn with(mut self, kind: impl Into<String>, executor: impl Executor + 'static) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn find(&self, kind: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
