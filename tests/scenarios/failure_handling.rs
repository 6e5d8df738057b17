//! Test: Failure Handling - step failures never stop the scheduler

use crate::helpers::*;
use jobflow::core::{Outcome, Verdict};
use jobflow::execution::{CriticalSet, ExecutionEvent, SchedulingStrategy};

const ABC: &str = r#"
name: "abc"
jobs:
  A: {}
  B:
    depends_on: [A]
    if: "success()"
  C:
    depends_on: [A]
    if: "always()"
"#;

/// A fails: B is skipped, C still runs, and the run fails because A is critical
#[tokio::test]
async fn test_failed_root_skips_success_dependents() {
    let mut pipeline = pipeline(ABC);
    let runner = ScriptedRunner::new().script("A", Script::Fail("exit code 1"));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("A"), Outcome::Failure);
    assert_eq!(result.outcome("B"), Outcome::Skipped);
    assert_eq!(result.outcome("C"), Outcome::Success);
    assert!(!result.runner.ran("B"));
    assert!(result.runner.ran("C"));

    assert_verdict(&result, Verdict::Failure);
    assert_eq!(result.report.exit_code(), 1);

    // B was never moved to Running
    assert!(!result.events.iter().any(
        |e| matches!(e, ExecutionEvent::InstanceStarted { instance } if instance == "B")
    ));
}

#[tokio::test]
async fn test_always_dependent_may_fail_independently() {
    let mut pipeline = pipeline(ABC);
    let runner = ScriptedRunner::new()
        .script("A", Script::Fail("exit code 1"))
        .script("C", Script::Fail("exit code 3"));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Sequential).await;

    assert_eq!(result.outcome("C"), Outcome::Failure);
    assert_eq!(result.reason("C").as_deref(), Some("exit code 3"));
    assert_verdict(&result, Verdict::Failure);
}

#[tokio::test]
async fn test_non_critical_failure_keeps_success() {
    let mut pipeline = pipeline(
        r#"
name: "optional"
jobs:
  build: {}
  coverage:
    critical: false
  publish:
    depends_on: [build]
    if: "success()"
  report:
    depends_on: [coverage]
"#,
    );
    let runner = ScriptedRunner::new().script("coverage", Script::Fail("upload failed"));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("coverage"), Outcome::Failure);
    assert_eq!(result.outcome("report"), Outcome::Skipped);
    assert_eq!(result.outcome("publish"), Outcome::Success);
    assert_verdict(&result, Verdict::Success);
}

#[tokio::test]
async fn test_caller_supplied_critical_set() {
    let runner = || ScriptedRunner::new().script("flaky", Script::Fail("exit code 1"));
    let yaml = "name: \"critical\"\njobs:\n  build: {}\n  flaky: {}\n";

    let mut excluded = pipeline(yaml).with_critical(CriticalSet::only(["build"]));
    let result = run_pipeline(&mut excluded, runner(), SchedulingStrategy::Parallel).await;
    assert_verdict(&result, Verdict::Success);
    assert!(!result.report.instance("flaky").unwrap().critical);

    let mut included = pipeline(yaml).with_critical(CriticalSet::only(["build", "flaky"]));
    let result = run_pipeline(&mut included, runner(), SchedulingStrategy::Parallel).await;
    assert_verdict(&result, Verdict::Failure);
}

#[tokio::test]
async fn test_errors_and_panics_are_captured_as_failures() {
    let mut pipeline = pipeline(
        r#"
name: "crashes"
jobs:
  erroring: {}
  panicking: {}
  healthy: {}
  after:
    depends_on: [panicking]
    if: "always()"
"#,
    );
    let runner = ScriptedRunner::new()
        .script("erroring", Script::Error)
        .script("panicking", Script::Panic);
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("erroring"), Outcome::Failure);
    assert!(result.reason("erroring").unwrap().contains("scripted error"));
    assert_eq!(result.outcome("panicking"), Outcome::Failure);
    assert_eq!(result.reason("panicking").as_deref(), Some("step runner panicked"));
    assert_eq!(result.outcome("healthy"), Outcome::Success);
    assert_eq!(result.outcome("after"), Outcome::Success);
    assert_all_terminal(&result);
}

#[tokio::test]
async fn test_summary_names_every_non_success_job() {
    let mut pipeline = pipeline(ABC);
    let runner = ScriptedRunner::new().script("A", Script::Fail("exit code 2"));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    let summary = result.report.summary();
    assert!(summary.contains("A"));
    assert!(summary.contains("exit code 2"));
    assert!(summary.contains("B"));
    assert_eq!(result.report.non_success().count(), 2);
}
