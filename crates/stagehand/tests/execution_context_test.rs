//! Integration tests for ExecutionContext

use stagehand::context::{CaseOutcome, ExecutionContext, LogLevel, OutputSink};
use stagehand::error::ContextError;
use stagehand::value::{Value, ValueType};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collects every event in memory.
#[derive(Default)]
struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

impl OutputSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str) {
        self.push(format!("{level}: {message}"));
    }

    fn case_started(&self, manifest_id: &str, case: &str) {
        self.push(format!("start {manifest_id}#{case}"));
    }

    fn case_finished(&self, manifest_id: &str, case: &str, outcome: &CaseOutcome) {
        self.push(format!("finish {manifest_id}#{case} passed={}", outcome.passed));
    }
}

#[tokio::test]
async fn test_concurrent_writers_do_not_lose_updates() {
    let ctx = Arc::new(ExecutionContext::new());

    let mut handles = Vec::new();
    for i in 0..32i64 {
        let ctx = Arc::clone(&ctx);
        handles.push(tokio::spawn(async move {
            ctx.data().set(format!("key-{i}"), i).await;
            ctx.data().get_int(&format!("key-{i}")).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), Ok(i as i64));
    }
    assert_eq!(ctx.data().len().await, 32);
}

#[tokio::test]
async fn test_snapshot_survives_later_writes() {
    let ctx = ExecutionContext::new();
    let mut body = BTreeMap::new();
    body.insert("items".to_string(), Value::from(vec![1i64, 2, 3]));
    ctx.data().set("orders", Value::Map(body)).await;

    let snapshot = ctx.data().all().await;
    ctx.data().set("orders", "replaced").await;

    assert_eq!(snapshot["orders"].value_type(), ValueType::Map);
    assert_eq!(
        snapshot["orders"].lookup("items[1]"),
        Some(&Value::Int(2))
    );
    assert_eq!(
        ctx.data().get_typed("orders", ValueType::Map).await,
        Err(ContextError::TypeMismatch {
            key: "orders".to_string(),
            expected: "map".to_string(),
            actual: "string".to_string(),
        })
    );
}

#[tokio::test]
async fn test_pass_value_reaches_every_waiter() {
    let ctx = Arc::new(ExecutionContext::new());

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.await_pass("session").await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(10)).await;
    ctx.pass().resolve("session", "abc").await.unwrap();

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Ok(Value::from("abc")));
    }
    assert!(matches!(
        ctx.pass().resolve("session", "again").await,
        Err(ContextError::AlreadyResolved { .. })
    ));
}

#[tokio::test]
async fn test_custom_sink_receives_events() {
    let sink = Arc::new(MemorySink::default());
    let ctx = ExecutionContext::new().with_sink(sink.clone());

    ctx.log(LogLevel::Warn, "disk almost full").await;
    let output = ctx.sink().await;
    output.case_started("default.HttpTest.orders", "list");
    output.case_finished(
        "default.HttpTest.orders",
        "list",
        &CaseOutcome::passed(Duration::from_millis(12)),
    );

    assert_eq!(
        sink.lines(),
        vec![
            "warn: disk almost full",
            "start default.HttpTest.orders#list",
            "finish default.HttpTest.orders#list passed=true",
        ]
    );
}
