//! Test: Cancellation - cooperative, before dispatch

use crate::helpers::*;
use jobflow::core::{Outcome, Verdict};
use jobflow::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use std::sync::Arc;
use std::time::Duration;

const CHAIN: &str = r#"
name: "chain"
jobs:
  build: {}
  test:
    depends_on: [build]
  deploy:
    depends_on: [test]
"#;

#[tokio::test]
async fn test_cancel_while_running_lets_running_instance_finish() {
    let mut pipeline = pipeline(CHAIN);
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(50)));

    let engine = ExecutionEngine::with_shared_runner(runner.clone(), SchedulingStrategy::Parallel);
    let cancel = engine.cancel_handle();
    let engine = engine.with_event_handler(move |event| {
        if let ExecutionEvent::InstanceStarted { instance } = &event {
            if instance == "build" {
                cancel.cancel();
            }
        }
    });

    let report = engine.execute(&mut pipeline).await.unwrap();

    assert_eq!(report.instance("build").unwrap().outcome, Outcome::Success);
    assert_eq!(report.instance("test").unwrap().outcome, Outcome::Cancelled);
    assert_eq!(report.instance("deploy").unwrap().outcome, Outcome::Cancelled);
    assert_eq!(runner.started(), vec!["build"]);

    assert_eq!(report.verdict, Verdict::Cancelled);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_cancel_from_another_task() {
    let mut pipeline = pipeline(CHAIN);
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(200)));

    let engine = ExecutionEngine::with_shared_runner(runner.clone(), SchedulingStrategy::Parallel);
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = engine.execute(&mut pipeline).await.unwrap();

    assert_eq!(report.instance("build").unwrap().outcome, Outcome::Success);
    assert_eq!(report.count(Outcome::Cancelled), 2);
    assert_eq!(report.verdict, Verdict::Cancelled);
}

#[tokio::test]
async fn test_failure_outranks_cancellation() {
    let mut pipeline = pipeline(CHAIN);
    let runner = Arc::new(ScriptedRunner::new().script("build", Script::Fail("exit code 1")));

    let engine = ExecutionEngine::with_shared_runner(runner.clone(), SchedulingStrategy::Parallel);
    let cancel = engine.cancel_handle();
    let engine = engine.with_event_handler(move |event| {
        if matches!(event, ExecutionEvent::InstanceStarted { .. }) {
            cancel.cancel();
        }
    });

    let report = engine.execute(&mut pipeline).await.unwrap();

    assert_eq!(report.instance("build").unwrap().outcome, Outcome::Failure);
    assert_eq!(report.count(Outcome::Cancelled), 2);
    assert_eq!(report.verdict, Verdict::Failure);
}

#[tokio::test]
async fn test_cancelled_gate_sees_cancelled_dependency() {
    let mut pipeline = pipeline(
        r#"
name: "cancel-notify"
jobs:
  build: {}
  test:
    depends_on: [build]
  cleanup:
    depends_on: [test]
    if: "cancelled()"
post_run:
  name: report-cancel
  if: "cancelled()"
  needs: [test]
"#,
    );
    let runner = Arc::new(ScriptedRunner::new());

    let engine = ExecutionEngine::with_shared_runner(runner.clone(), SchedulingStrategy::Parallel);
    let cancel = engine.cancel_handle();
    let engine = engine.with_event_handler(move |event| {
        if let ExecutionEvent::InstanceStarted { instance } = &event {
            if instance == "build" {
                cancel.cancel();
            }
        }
    });

    let report = engine.execute(&mut pipeline).await.unwrap();

    assert_eq!(report.instance("test").unwrap().outcome, Outcome::Cancelled);
    // Pending work never starts after cancellation, whatever its gate
    assert_eq!(report.instance("cleanup").unwrap().outcome, Outcome::Cancelled);

    let post = report.post_run.as_ref().unwrap();
    assert_eq!(post.outcome, Outcome::Success);
    assert!(runner.ran("report-cancel"));
    assert_eq!(report.verdict, Verdict::Cancelled);
}
