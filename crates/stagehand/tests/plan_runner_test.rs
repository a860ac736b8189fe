//! Integration tests for PlanRunner
//!
//! These tests verify stage barriers, strict and parallel dispatch semantics,
//! hook sequencing, cancellation, and data hand-off through the execution
//! context.

use async_trait::async_trait;
use stagehand::config::RunnerConfig;
use stagehand::context::ExecutionContext;
use stagehand::error::RunError;
use stagehand::manifest::{ManifestDocument, ManifestRef, kinds};
use stagehand::plan::{Action, HookEvent, Hooks, Plan, Stage};
use stagehand::runner::{
    Executor, ExecutorRegistry, HooksRunner, ManifestStatus, PlanRunner, RunState,
};
use stagehand::value::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Executors
// ============================================================================

/// Records every invocation, optionally sleeps, then writes `done` under the
/// manifest ID unless the manifest is listed as failing.
#[derive(Clone, Default)]
struct RecordingExecutor {
    invocations: Arc<Mutex<Vec<String>>>,
    failing: HashSet<String>,
    delays: Vec<(String, Duration)>,
}

impl RecordingExecutor {
    fn failing_on(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.push((id.to_string(), delay));
        self
    }

    async fn invocations(&self) -> Vec<String> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn run(&self, ctx: &ExecutionContext, manifest: ManifestRef) -> anyhow::Result<()> {
        let id = manifest.id();
        self.invocations.lock().await.push(id.clone());

        if let Some((_, delay)) = self.delays.iter().find(|(target, _)| *target == id) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing.contains(&id) {
            anyhow::bail!("{} exploded", manifest.name());
        }
        ctx.data().set(id, "done").await;
        Ok(())
    }
}

/// Sleeps far longer than any test runs.
struct HangingExecutor;

#[async_trait]
impl Executor for HangingExecutor {
    async fn run(&self, _ctx: &ExecutionContext, _manifest: ManifestRef) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

/// Tracks the highest number of concurrently running manifests.
#[derive(Default)]
struct ConcurrencyProbe {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Executor for ConcurrencyProbe {
    async fn run(&self, _ctx: &ExecutionContext, _manifest: ManifestRef) -> anyhow::Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Producer resolves `token`; consumer waits for it and stores what it got.
struct HandOffExecutor;

#[async_trait]
impl Executor for HandOffExecutor {
    async fn run(&self, ctx: &ExecutionContext, manifest: ManifestRef) -> anyhow::Result<()> {
        if manifest.name() == "producer" {
            tokio::time::sleep(Duration::from_millis(30)).await;
            ctx.pass().resolve("token", "s3cret").await?;
        } else {
            let token = ctx.await_pass("token").await?;
            ctx.data().set("consumer.token", token).await;
        }
        Ok(())
    }
}

/// Records `(scope, event)` for every non-empty hook batch.
#[derive(Default)]
struct RecordingHooks {
    calls: Mutex<Vec<(String, HookEvent)>>,
}

#[async_trait]
impl HooksRunner for RecordingHooks {
    async fn run_hooks(
        &self,
        _ctx: &ExecutionContext,
        scope: &str,
        event: HookEvent,
        _actions: &[Action],
    ) -> Result<(), RunError> {
        self.calls.lock().await.push((scope.to_string(), event));
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn context(manifests: Vec<ManifestRef>) -> Arc<ExecutionContext> {
    let ctx = ExecutionContext::new();
    ctx.insert_manifests(manifests).await;
    Arc::new(ctx)
}

fn tests(names: &[&str]) -> Vec<ManifestRef> {
    names
        .iter()
        .map(|name| ManifestDocument::new(kinds::HTTP_TEST, *name).into_ref())
        .collect()
}

fn id(name: &str) -> String {
    format!("default.HttpTest.{name}")
}

fn stage(name: &str, names: &[&str]) -> Stage {
    Stage::new(name, names.iter().map(|n| id(n)).collect())
}

fn every_hook() -> Hooks {
    [
        HookEvent::BeforeRun,
        HookEvent::AfterRun,
        HookEvent::OnSuccess,
        HookEvent::OnFailure,
    ]
    .into_iter()
    .fold(Hooks::default(), |hooks, event| {
        hooks.on(event, Action::log(event.to_string()))
    })
}

// ============================================================================
// Dispatch semantics
// ============================================================================

#[tokio::test]
async fn test_parallel_failure_still_completes_siblings() {
    let executor = RecordingExecutor::default()
        .failing_on(&id("bad"))
        .with_delay(&id("good"), Duration::from_millis(50));
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor.clone()));
    let ctx = context(tests(&["good", "bad"])).await;
    let plan = Plan::new(vec![stage("suite", &["good", "bad"]).parallel()]);

    let err = runner.run_plan(Arc::clone(&ctx), &plan).await.unwrap_err();

    assert!(matches!(err, RunError::Execution { ref id, .. } if id == "default.HttpTest.bad"));
    assert_eq!(
        ctx.data().get(&id("good")).await.unwrap(),
        Value::from("done")
    );

    let journal = runner.journal().await;
    assert_eq!(journal.status(&id("good")), Some(ManifestStatus::Completed));
    assert_eq!(journal.status(&id("bad")), Some(ManifestStatus::Failed));
    assert_eq!(executor.invocations().await.len(), 2);
}

#[tokio::test]
async fn test_parallel_errors_are_joined() {
    let executor = RecordingExecutor::default()
        .failing_on(&id("a"))
        .failing_on(&id("b"));
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor));
    let ctx = context(tests(&["a", "b", "c"])).await;
    let plan = Plan::new(vec![stage("suite", &["a", "b", "c"]).parallel()]);

    let err = runner.run_plan(ctx, &plan).await.unwrap_err();

    assert!(matches!(err, RunError::Aggregate(_)));
    assert_eq!(err.leaves().len(), 2);
    let message = err.to_string();
    assert!(message.contains("a exploded"));
    assert!(message.contains("b exploded"));
    assert!(message.contains("; "));
}

#[tokio::test]
async fn test_failed_stage_halts_plan() {
    let executor = RecordingExecutor::default().failing_on(&id("setup"));
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor.clone()));
    let ctx = context(tests(&["setup", "later_a", "later_b"])).await;
    let plan = Plan::new(vec![
        stage("first", &["setup"]),
        stage("second", &["later_a", "later_b"]).parallel(),
    ]);

    assert!(runner.run_plan(ctx, &plan).await.is_err());

    assert_eq!(executor.invocations().await, vec![id("setup")]);
    assert_eq!(runner.state().await, RunState::Failed { stage: Some(0) });

    let journal = runner.journal().await;
    assert_eq!(
        journal.with_status(ManifestStatus::Skipped),
        vec![id("later_a"), id("later_b")]
    );
}

#[tokio::test]
async fn test_strict_stage_fails_fast() {
    let executor = RecordingExecutor::default().failing_on(&id("first"));
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor.clone()));
    let ctx = context(tests(&["first", "second"])).await;
    let plan = Plan::new(vec![stage("suite", &["first", "second"])]);

    assert!(runner.run_plan(Arc::clone(&ctx), &plan).await.is_err());

    assert_eq!(executor.invocations().await, vec![id("first")]);
    assert!(!ctx.data().contains(&id("second")).await);
    assert_eq!(
        runner.journal().await.status(&id("second")),
        Some(ManifestStatus::Skipped)
    );
}

#[tokio::test]
async fn test_strict_stage_runs_in_declaration_order() {
    let executor = RecordingExecutor::default();
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor.clone()));
    let ctx = context(tests(&["c", "a", "b"])).await;
    let plan = Plan::new(vec![stage("suite", &["c", "a", "b"])]);

    runner.run_plan(ctx, &plan).await.unwrap();

    assert_eq!(executor.invocations().await, vec![id("c"), id("a"), id("b")]);
    assert_eq!(runner.state().await, RunState::Done);
}

#[tokio::test]
async fn test_missing_executor_does_not_block_parallel_siblings() {
    let executor = RecordingExecutor::default();
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor.clone()));
    let mut manifests = tests(&["ok"]);
    manifests.push(ManifestDocument::new("Grpc", "orphan").into_ref());
    let ctx = context(manifests).await;
    let plan = Plan::new(vec![
        Stage::new("mixed", vec![id("ok"), "default.Grpc.orphan".to_string()]).parallel(),
    ]);

    let err = runner.run_plan(Arc::clone(&ctx), &plan).await.unwrap_err();

    match err {
        RunError::ExecutorNotFound { kind, id } => {
            assert_eq!(kind, "Grpc");
            assert_eq!(id, "default.Grpc.orphan");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(ctx.data().contains(&id("ok")).await);
}

#[tokio::test]
async fn test_unloaded_manifest_fails() {
    let runner = PlanRunner::new(
        ExecutorRegistry::new().with(kinds::HTTP_TEST, RecordingExecutor::default()),
    );
    let ctx = context(Vec::new()).await;
    let plan = Plan::new(vec![stage("suite", &["ghost"])]);

    assert!(matches!(
        runner.run_plan(ctx, &plan).await,
        Err(RunError::ManifestNotFound { .. })
    ));
}

#[tokio::test]
async fn test_max_concurrent_tasks_bounds_parallel_stage() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let mut registry = ExecutorRegistry::new();
    registry.register_arc(kinds::HTTP_TEST, probe.clone());
    let runner =
        PlanRunner::new(registry).with_config(RunnerConfig::new().with_max_concurrent_tasks(2));
    let ctx = context(tests(&["a", "b", "c", "d", "e"])).await;
    let plan = Plan::new(vec![stage("suite", &["a", "b", "c", "d", "e"]).parallel()]);

    runner.run_plan(ctx, &plan).await.unwrap();

    let peak = probe.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {peak}");
    assert!(peak >= 1);
}

// ============================================================================
// Hooks
// ============================================================================

#[tokio::test]
async fn test_hook_sequence_on_success() {
    let hooks = Arc::new(RecordingHooks::default());
    let runner = PlanRunner::new(
        ExecutorRegistry::new().with(kinds::HTTP_TEST, RecordingExecutor::default()),
    )
    .with_hooks_runner(hooks.clone());
    let ctx = context(tests(&["a"])).await;
    let plan = Plan::new(vec![stage("suite", &["a"]).with_hooks(every_hook())]).with_hooks(every_hook());

    runner.run_plan(ctx, &plan).await.unwrap();

    let calls = hooks.calls.lock().await.clone();
    assert_eq!(
        calls,
        vec![
            ("plan".to_string(), HookEvent::BeforeRun),
            ("suite".to_string(), HookEvent::BeforeRun),
            ("suite".to_string(), HookEvent::AfterRun),
            ("suite".to_string(), HookEvent::OnSuccess),
            ("plan".to_string(), HookEvent::AfterRun),
            ("plan".to_string(), HookEvent::OnSuccess),
        ]
    );

    let visited = runner.history().await;
    assert_eq!(visited.visited().first(), Some(&RunState::PlanHooks(HookEvent::BeforeRun)));
    assert_eq!(visited.current(), RunState::Done);
}

#[tokio::test]
async fn test_hook_sequence_on_failure() {
    let hooks = Arc::new(RecordingHooks::default());
    let executor = RecordingExecutor::default().failing_on(&id("a"));
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor))
        .with_hooks_runner(hooks.clone());
    let ctx = context(tests(&["a", "b"])).await;
    let plan = Plan::new(vec![
        stage("first", &["a"]).with_hooks(every_hook()),
        stage("second", &["b"]).with_hooks(every_hook()),
    ])
    .with_hooks(every_hook());

    assert!(runner.run_plan(ctx, &plan).await.is_err());

    let calls = hooks.calls.lock().await.clone();
    assert_eq!(
        calls,
        vec![
            ("plan".to_string(), HookEvent::BeforeRun),
            ("first".to_string(), HookEvent::BeforeRun),
            ("first".to_string(), HookEvent::AfterRun),
            ("first".to_string(), HookEvent::OnFailure),
            ("plan".to_string(), HookEvent::OnFailure),
        ]
    );
}

#[tokio::test]
async fn test_failing_before_hook_aborts_run() {
    let executor = RecordingExecutor::default();
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor.clone()));
    let ctx = context(tests(&["a"])).await;
    let plan = Plan::new(vec![stage("suite", &["a"])]).with_hooks(
        Hooks::default().on(HookEvent::BeforeRun, Action::fail("environment not ready")),
    );

    let err = runner.run_plan(ctx, &plan).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "beforeRun hook failed for plan: environment not ready"
    );
    assert!(executor.invocations().await.is_empty());
    assert_eq!(runner.state().await, RunState::Failed { stage: None });
}

#[tokio::test]
async fn test_failing_after_hook_fails_successful_stage() {
    let executor = RecordingExecutor::default();
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, executor.clone()));
    let ctx = context(tests(&["a", "b"])).await;
    let plan = Plan::new(vec![
        stage("first", &["a"]).with_hooks(
            Hooks::default()
                .on(HookEvent::AfterRun, Action::fail("teardown failed"))
                .on(HookEvent::OnFailure, Action::save("first.failed", true)),
        ),
        stage("second", &["b"]),
    ]);

    let err = runner.run_plan(Arc::clone(&ctx), &plan).await.unwrap_err();

    assert!(matches!(err, RunError::Hook { .. }));
    assert_eq!(executor.invocations().await, vec![id("a")]);
    assert_eq!(ctx.data().get_bool("first.failed").await, Ok(true));
}

#[tokio::test]
async fn test_default_hooks_write_to_data_store() {
    let runner = PlanRunner::new(
        ExecutorRegistry::new().with(kinds::HTTP_TEST, RecordingExecutor::default()),
    );
    let ctx = context(tests(&["a"])).await;
    let plan = Plan::new(vec![stage("suite", &["a"]).with_hooks(
        Hooks::default().on(HookEvent::OnSuccess, Action::save("suite.status", "green")),
    )])
    .with_hooks(Hooks::default().on(HookEvent::AfterRun, Action::log("all stages finished")));

    runner.run_plan(Arc::clone(&ctx), &plan).await.unwrap();

    assert_eq!(ctx.data().get_string("suite.status").await.unwrap(), "green");
}

// ============================================================================
// Cancellation and hand-off
// ============================================================================

#[tokio::test]
async fn test_cancellation_stops_running_stage() {
    let token = CancellationToken::new();
    let ctx = ExecutionContext::with_cancellation_token(token.clone());
    ctx.insert_manifests(tests(&["slow"])).await;
    let ctx = Arc::new(ctx);
    let recorder = RecordingExecutor::default();
    let runner = PlanRunner::new(
        ExecutorRegistry::new()
            .with(kinds::HTTP_TEST, HangingExecutor)
            .with(kinds::LOAD_TEST, recorder.clone()),
    );
    let plan = Plan::new(vec![
        stage("suite", &["slow"]),
        Stage::new("load", vec!["default.LoadTest.never".to_string()]),
    ]);

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        })
    };

    let started = Instant::now();
    let err = runner.run_plan(ctx, &plan).await.unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_cancelled(), "expected cancellation, got {err}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(recorder.invocations().await.is_empty());
    assert_eq!(
        runner.journal().await.status("default.LoadTest.never"),
        Some(ManifestStatus::Skipped)
    );
}

#[tokio::test]
async fn test_cancelled_parallel_stage_reports_single_cancellation() {
    let token = CancellationToken::new();
    let ctx = ExecutionContext::with_cancellation_token(token.clone());
    ctx.insert_manifests(tests(&["a", "b", "c"])).await;
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, HangingExecutor));
    let plan = Plan::new(vec![stage("suite", &["a", "b", "c"]).parallel()]);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });

    let err = runner.run_plan(Arc::new(ctx), &plan).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, RunError::Cancelled), "expected a single cancellation, got {err:?}");
    assert_eq!(err.to_string(), "Run cancelled");
}

#[tokio::test]
async fn test_pass_value_hand_off_inside_parallel_stage() {
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, HandOffExecutor));
    let ctx = context(tests(&["consumer", "producer"])).await;
    let plan = Plan::new(vec![stage("suite", &["consumer", "producer"]).parallel()]);

    runner.run_plan(Arc::clone(&ctx), &plan).await.unwrap();

    assert_eq!(
        ctx.data().get("consumer.token").await.unwrap(),
        Value::from("s3cret")
    );
}

#[tokio::test]
async fn test_late_consumer_in_later_stage_receives_value() {
    let runner = PlanRunner::new(ExecutorRegistry::new().with(kinds::HTTP_TEST, HandOffExecutor));
    let ctx = context(tests(&["producer", "consumer"])).await;
    let plan = Plan::new(vec![stage("produce", &["producer"]), stage("consume", &["consumer"])]);

    runner.run_plan(Arc::clone(&ctx), &plan).await.unwrap();

    assert_eq!(
        ctx.data().get_string("consumer.token").await.unwrap(),
        "s3cret"
    );
}
