//! Plan execution.
//!
//! [`PlanRunner`] walks a [`Plan`] stage by stage. Stages are hard barriers:
//! stage `i + 1` starts only after stage `i`'s manifests and hooks have all
//! finished. A failing stage halts the plan.
//!
//! Within a stage, manifests are dispatched one of two ways:
//! - strict: one after another in declaration order, stopping at the first
//!   failure;
//! - parallel: one tokio task per manifest, every task runs to completion and
//!   the collected errors are joined into [`RunError::Aggregate`].

pub mod executor;
pub mod hooks;
pub mod state;

pub use executor::{Executor, ExecutorRegistry};
pub use hooks::{DefaultHooksRunner, HooksRunner};
pub use state::{
    ManifestRecord, ManifestStatus, RunJournal, RunState, StateHistory, current_timestamp_ms,
};

use crate::config::RunnerConfig;
use crate::context::ExecutionContext;
use crate::error::RunError;
use crate::plan::{HookEvent, Hooks, Plan, Stage};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Hook scope name used for plan-level hooks.
pub const PLAN_SCOPE: &str = "plan";

/// Executes plans against an [`ExecutorRegistry`].
///
/// # Examples
///
/// ```no_run
/// use stagehand::context::ExecutionContext;
/// use stagehand::plan::{Plan, Stage};
/// use stagehand::runner::{ExecutorRegistry, PlanRunner};
/// use std::sync::Arc;
///
/// # async fn run(executors: ExecutorRegistry) -> Result<(), stagehand::error::RunError> {
/// let runner = PlanRunner::new(executors);
/// let ctx = Arc::new(ExecutionContext::new());
/// let plan = Plan::new(vec![Stage::new("infra", vec!["default.Server.api".into()])]);
/// runner.run_plan(ctx, &plan).await
/// # }
/// ```
pub struct PlanRunner {
    executors: Arc<ExecutorRegistry>,
    hooks: Arc<dyn HooksRunner>,
    config: RunnerConfig,
    state: Mutex<StateHistory>,
    journal: Arc<Mutex<RunJournal>>,
}

impl PlanRunner {
    pub fn new(executors: ExecutorRegistry) -> Self {
        Self {
            executors: Arc::new(executors),
            hooks: Arc::new(DefaultHooksRunner),
            config: RunnerConfig::default(),
            state: Mutex::new(StateHistory::default()),
            journal: Arc::new(Mutex::new(RunJournal::default())),
        }
    }

    pub fn with_hooks_runner(mut self, hooks: Arc<dyn HooksRunner>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Current state of the latest run.
    pub async fn state(&self) -> RunState {
        self.state.lock().await.current()
    }

    /// Every state the latest run visited.
    pub async fn history(&self) -> StateHistory {
        self.state.lock().await.clone()
    }

    /// Per-manifest outcomes of the latest run.
    pub async fn journal(&self) -> RunJournal {
        self.journal.lock().await.clone()
    }

    /// Runs `plan`. Manifests are resolved from `ctx` by ID.
    ///
    /// Returns the first stage error (joined with any failing failure hooks).
    /// Stages after a failing stage never run.
    pub async fn run_plan(&self, ctx: Arc<ExecutionContext>, plan: &Plan) -> Result<(), RunError> {
        *self.state.lock().await = StateHistory::default();
        *self.journal.lock().await = RunJournal::from_plan(plan);

        async {
            info!(stages = plan.stages.len(), "Starting plan run");

            self.transition(RunState::PlanHooks(HookEvent::BeforeRun)).await;
            if let Err(e) = self
                .run_hooks(&ctx, PLAN_SCOPE, HookEvent::BeforeRun, &plan.hooks)
                .await
            {
                return self.fail(None, e).await;
            }

            for (index, stage) in plan.stages.iter().enumerate() {
                if ctx.is_cancelled() {
                    return self.fail(Some(index), RunError::Cancelled).await;
                }

                let scope = stage_scope(index, stage);
                let outcome = self
                    .run_stage(&ctx, index, stage, &scope)
                    .instrument(info_span!("stage", stage = %scope, index))
                    .await;
                if let Err(stage_error) = outcome {
                    let mut errors = vec![stage_error];
                    if !ctx.is_cancelled() {
                        self.transition(RunState::PlanHooks(HookEvent::OnFailure)).await;
                        if let Err(e) = self
                            .run_hooks(&ctx, PLAN_SCOPE, HookEvent::OnFailure, &plan.hooks)
                            .await
                        {
                            errors.push(e);
                        }
                    }
                    let error = RunError::join(errors).unwrap_or(RunError::Cancelled);
                    return self.fail(Some(index), error).await;
                }
            }

            for event in [HookEvent::AfterRun, HookEvent::OnSuccess] {
                self.transition(RunState::PlanHooks(event)).await;
                if let Err(e) = self.run_hooks(&ctx, PLAN_SCOPE, event, &plan.hooks).await {
                    return self.fail(None, e).await;
                }
            }

            self.transition(RunState::Done).await;
            info!("Plan run completed");
            Ok(())
        }
        .instrument(info_span!("plan_run", stages = plan.stages.len()))
        .await
    }

    async fn run_stage(
        &self,
        ctx: &Arc<ExecutionContext>,
        index: usize,
        stage: &Stage,
        scope: &str,
    ) -> Result<(), RunError> {
        self.transition(RunState::StageHooks {
            stage: index,
            event: HookEvent::BeforeRun,
        })
        .await;
        self.run_hooks(ctx, scope, HookEvent::BeforeRun, &stage.hooks)
            .await?;

        self.transition(RunState::RunningStage(index)).await;
        info!(
            manifests = stage.manifests.len(),
            parallel = stage.parallel,
            "Dispatching stage"
        );
        let dispatched = if stage.parallel {
            self.dispatch_parallel(ctx, &stage.manifests).await
        } else {
            self.dispatch_strict(ctx, &stage.manifests).await
        };

        self.transition(RunState::StageHooks {
            stage: index,
            event: HookEvent::AfterRun,
        })
        .await;
        let mut errors: Vec<RunError> = dispatched.err().into_iter().collect();
        if let Err(e) = self
            .run_hooks(ctx, scope, HookEvent::AfterRun, &stage.hooks)
            .await
        {
            errors.push(e);
        }

        if errors.is_empty() {
            self.transition(RunState::StageHooks {
                stage: index,
                event: HookEvent::OnSuccess,
            })
            .await;
            self.run_hooks(ctx, scope, HookEvent::OnSuccess, &stage.hooks)
                .await?;
            info!("Stage completed");
            return Ok(());
        }

        warn!(errors = errors.len(), "Stage failed");
        if !ctx.is_cancelled() {
            self.transition(RunState::StageHooks {
                stage: index,
                event: HookEvent::OnFailure,
            })
            .await;
            if let Err(e) = self
                .run_hooks(ctx, scope, HookEvent::OnFailure, &stage.hooks)
                .await
            {
                errors.push(e);
            }
        }
        Err(RunError::join(errors).unwrap_or(RunError::Cancelled))
    }

    async fn dispatch_strict(
        &self,
        ctx: &Arc<ExecutionContext>,
        manifests: &[String],
    ) -> Result<(), RunError> {
        for id in manifests {
            if ctx.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            Self::execute_manifest(
                Arc::clone(ctx),
                Arc::clone(&self.executors),
                Arc::clone(&self.journal),
                id.clone(),
            )
            .instrument(info_span!("manifest", manifest_id = %id))
            .await?;
        }
        Ok(())
    }

    async fn dispatch_parallel(
        &self,
        ctx: &Arc<ExecutionContext>,
        manifests: &[String],
    ) -> Result<(), RunError> {
        let semaphore = self
            .config
            .max_concurrent_tasks
            .map(|max| Arc::new(Semaphore::new(max)));

        let mut tasks = Vec::with_capacity(manifests.len());
        for id in manifests {
            let ctx = Arc::clone(ctx);
            let executors = Arc::clone(&self.executors);
            let journal = Arc::clone(&self.journal);
            let semaphore = semaphore.clone();
            let manifest_id = id.clone();
            let span = info_span!("manifest", manifest_id = %id);

            let task = tokio::spawn(
                async move {
                    let _permit = match semaphore {
                        Some(semaphore) => match semaphore.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(_) => return Err(RunError::Cancelled),
                        },
                        None => None,
                    };
                    Self::execute_manifest(ctx, executors, journal, manifest_id).await
                }
                .instrument(span),
            );
            tasks.push((id.clone(), task));
        }

        let (ids, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
        let mut errors = Vec::new();
        for (id, joined) in ids.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(join_error) => {
                    error!(manifest_id = %id, error = %join_error, "Manifest task aborted");
                    errors.push(RunError::execution(
                        id,
                        anyhow::anyhow!("task aborted: {join_error}"),
                    ));
                }
            }
        }

        match RunError::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn execute_manifest(
        ctx: Arc<ExecutionContext>,
        executors: Arc<ExecutorRegistry>,
        journal: Arc<Mutex<RunJournal>>,
        id: String,
    ) -> Result<(), RunError> {
        journal.lock().await.mark_running(&id);
        let started = Instant::now();

        let result = Self::run_executor(&ctx, &executors, &id).await;

        let elapsed = started.elapsed();
        match &result {
            Ok(()) => debug!(duration_ms = elapsed.as_millis() as u64, "Manifest completed"),
            Err(e) => warn!(error = %e, "Manifest failed"),
        }
        journal
            .lock()
            .await
            .mark_finished(&id, elapsed, result.as_ref().err().map(ToString::to_string));
        result
    }

    async fn run_executor(
        ctx: &ExecutionContext,
        executors: &ExecutorRegistry,
        id: &str,
    ) -> Result<(), RunError> {
        let manifest = ctx
            .manifest(id)
            .await
            .ok_or_else(|| RunError::ManifestNotFound { id: id.to_string() })?;
        let executor = executors
            .find(manifest.kind())
            .ok_or_else(|| RunError::ExecutorNotFound {
                kind: manifest.kind().to_string(),
                id: id.to_string(),
            })?;

        debug!(kind = manifest.kind(), "Running executor");
        tokio::select! {
            _ = ctx.cancellation_token().cancelled() => Err(RunError::Cancelled),
            outcome = executor.run(ctx, manifest) => {
                outcome.map_err(|e| RunError::execution(id, e))
            }
        }
    }

    async fn run_hooks(
        &self,
        ctx: &ExecutionContext,
        scope: &str,
        event: HookEvent,
        hooks: &Hooks,
    ) -> Result<(), RunError> {
        let actions = hooks.actions(event);
        if actions.is_empty() {
            return Ok(());
        }
        debug!(scope, event = %event, actions = actions.len(), "Running hooks");
        tokio::select! {
            _ = ctx.cancellation_token().cancelled() => Err(RunError::Cancelled),
            result = self.hooks.run_hooks(ctx, scope, event, actions) => result,
        }
    }

    async fn transition(&self, next: RunState) {
        self.state.lock().await.transition(next);
    }

    async fn fail(&self, stage: Option<usize>, error: RunError) -> Result<(), RunError> {
        self.transition(RunState::Failed { stage }).await;
        self.journal.lock().await.skip_pending();
        error!(stage = ?stage, error = %error, "Plan run failed");
        Err(error)
    }
}

fn stage_scope(index: usize, stage: &Stage) -> String {
    if stage.name.is_empty() {
        format!("stage-{index}")
    } else {
        stage.name.clone()
    }
}

impl std::fmt::Debug for PlanRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanRunner")
            .field("executors", &self.executors)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
