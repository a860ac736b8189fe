//! Shared state for one plan run.
//!
//! [`ExecutionContext`] aggregates four independently locked stores: loaded
//! manifests, the typed [`DataStore`], the one-shot [`PassChannels`], and the
//! [`OutputSink`]. No method holds more than one of these locks at a time.
//! The context also owns the run's root [`CancellationToken`].

pub mod pass;
pub mod sink;
pub mod store;

pub use pass::PassChannels;
pub use sink::{CaseOutcome, LogLevel, OutputSink, TracingSink};
pub use store::DataStore;

use crate::error::ContextError;
use crate::manifest::ManifestRef;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub struct ExecutionContext {
    manifests: RwLock<BTreeMap<String, ManifestRef>>,
    data: DataStore,
    pass: PassChannels,
    sink: RwLock<Arc<dyn OutputSink>>,
    cancellation_token: CancellationToken,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Creates an empty context reporting through [`TracingSink`].
    pub fn new() -> Self {
        Self::with_cancellation_token(CancellationToken::new())
    }

    /// Creates an empty context whose run is cancelled through `token`.
    pub fn with_cancellation_token(token: CancellationToken) -> Self {
        Self {
            manifests: RwLock::new(BTreeMap::new()),
            data: DataStore::new(),
            pass: PassChannels::new(),
            sink: RwLock::new(Arc::new(TracingSink)),
            cancellation_token: token,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = RwLock::new(sink);
        self
    }

    // ---- manifests ----

    /// Loads a manifest, replacing any manifest with the same ID.
    pub async fn insert_manifest(&self, manifest: ManifestRef) -> Option<ManifestRef> {
        self.manifests.write().await.insert(manifest.id(), manifest)
    }

    pub async fn insert_manifests(&self, manifests: impl IntoIterator<Item = ManifestRef>) {
        let mut store = self.manifests.write().await;
        for manifest in manifests {
            store.insert(manifest.id(), manifest);
        }
    }

    pub async fn manifest(&self, id: &str) -> Option<ManifestRef> {
        self.manifests.read().await.get(id).cloned()
    }

    /// Loaded manifests of one kind, ordered by ID.
    pub async fn manifests_by_kind(&self, kind: &str) -> Vec<ManifestRef> {
        self.manifests
            .read()
            .await
            .values()
            .filter(|m| m.kind() == kind)
            .cloned()
            .collect()
    }

    pub async fn manifest_ids(&self) -> Vec<String> {
        self.manifests.read().await.keys().cloned().collect()
    }

    // ---- data ----

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    pub fn pass(&self) -> &PassChannels {
        &self.pass
    }

    /// Waits for a pass value, failing with `Cancelled` if the run is cancelled first.
    pub async fn await_pass(&self, key: &str) -> Result<Value, ContextError> {
        self.pass.await_value(key, &self.cancellation_token).await
    }

    // ---- output ----

    pub async fn sink(&self) -> Arc<dyn OutputSink> {
        Arc::clone(&*self.sink.read().await)
    }

    pub async fn set_sink(&self, sink: Arc<dyn OutputSink>) {
        *self.sink.write().await = sink;
    }

    pub async fn log(&self, level: LogLevel, message: &str) {
        self.sink().await.log(level, message);
    }

    // ---- cancellation ----

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
