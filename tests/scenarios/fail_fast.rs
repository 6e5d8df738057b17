//! Test: Fail-fast - unsatisfiable work is skipped early, running work finishes

use crate::helpers::*;
use jobflow::core::{Outcome, Verdict};
use jobflow::execution::{ExecutionEvent, SchedulingStrategy};
use std::time::Duration;

const MATRIX_DEPLOY: &str = r#"
name: "fail-fast"
fail_fast: true
jobs:
  test:
    matrix:
      os: [fast, slow]
  deploy:
    depends_on: [test]
  notify:
    depends_on: [test]
    if: "always()"
"#;

fn event_position(events: &[ExecutionEvent], pred: impl Fn(&ExecutionEvent) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .expect("event should have been emitted")
}

#[tokio::test]
async fn test_dependents_skipped_before_running_siblings_finish() {
    let mut pipeline = pipeline(MATRIX_DEPLOY);
    let runner = ScriptedRunner::new()
        .script("test (os=fast)", Script::Fail("exit code 1"))
        .delay_for("test (os=slow)", Duration::from_millis(300));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("test (os=fast)"), Outcome::Failure);
    // Already running when fail-fast triggered, so it was left to finish
    assert_eq!(result.outcome("test (os=slow)"), Outcome::Success);
    assert_eq!(result.outcome("deploy"), Outcome::Skipped);
    assert_eq!(
        result.reason("deploy").as_deref(),
        Some("fail-fast: condition can no longer be met")
    );
    // always() can still be met, so it waits for the slow sibling and runs
    assert_eq!(result.outcome("notify"), Outcome::Success);
    assert!(result.runner.finished_before("test (os=slow)", "notify"));

    let triggered = event_position(&result.events, |e| {
        matches!(e, ExecutionEvent::FailFastTriggered { instance } if instance == "test (os=fast)")
    });
    let deploy_skipped = event_position(&result.events, |e| {
        matches!(e, ExecutionEvent::InstanceSkipped { instance, .. } if instance == "deploy")
    });
    let slow_finished = event_position(&result.events, |e| {
        matches!(e, ExecutionEvent::InstanceFinished { instance, .. } if instance == "test (os=slow)")
    });
    assert!(triggered < deploy_skipped);
    assert!(deploy_skipped < slow_finished);

    assert_verdict(&result, Verdict::Failure);
}

#[tokio::test]
async fn test_without_fail_fast_dependents_wait_for_every_sibling() {
    let mut pipeline = pipeline(MATRIX_DEPLOY).with_fail_fast(false);
    let runner = ScriptedRunner::new()
        .script("test (os=fast)", Script::Fail("exit code 1"))
        .delay_for("test (os=slow)", Duration::from_millis(100));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("deploy"), Outcome::Skipped);
    assert!(result.reason("deploy").unwrap().contains("not met"));
    assert!(!result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::FailFastTriggered { .. })));

    let deploy_skipped = event_position(&result.events, |e| {
        matches!(e, ExecutionEvent::InstanceSkipped { instance, .. } if instance == "deploy")
    });
    let slow_finished = event_position(&result.events, |e| {
        matches!(e, ExecutionEvent::InstanceFinished { instance, .. } if instance == "test (os=slow)")
    });
    assert!(slow_finished < deploy_skipped);
}
