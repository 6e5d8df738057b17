//! Test: Post-run action - gated once after the DAG, never changes the verdict

use crate::helpers::*;
use jobflow::core::{Outcome, Verdict};
use jobflow::execution::SchedulingStrategy;

const AUTOFIX: &str = r#"
name: "autofix"
jobs:
  fmt: {}
  lint:
    depends_on: [fmt]
post_run:
  name: commit-fixes
  if: "failure() && !is_pull_request"
  needs: [lint]
  steps: ["git commit -am fixes"]
"#;

#[tokio::test]
async fn test_post_run_fires_on_failure() {
    let mut pipeline = pipeline(AUTOFIX);
    let runner = ScriptedRunner::new().script("lint", Script::Fail("exit code 1"));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    let post = result.report.post_run.as_ref().expect("post-run should be reported");
    assert_eq!(post.name, "commit-fixes");
    assert_eq!(post.outcome, Outcome::Success);

    // Runs after every instance is terminal
    assert!(result.runner.finished_before("lint", "commit-fixes"));
    assert_eq!(result.runner.started().last().map(String::as_str), Some("commit-fixes"));
    assert!(pipeline.post_run.as_ref().unwrap().was_invoked());
    assert_verdict(&result, Verdict::Failure);
}

#[tokio::test]
async fn test_post_run_skipped_when_gate_not_met() {
    let mut pipeline = pipeline(AUTOFIX);
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;

    let post = result.report.post_run.as_ref().unwrap();
    assert_eq!(post.outcome, Outcome::Skipped);
    assert!(!result.runner.ran("commit-fixes"));
    assert_verdict(&result, Verdict::Success);
}

#[tokio::test]
async fn test_post_run_failure_does_not_change_verdict() {
    let mut pipeline = pipeline(
        r#"
name: "notify"
jobs:
  build: {}
post_run:
  name: notify
"#,
    );
    let runner = ScriptedRunner::new().script("notify", Script::Fail("webhook down"));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    // No `if` means the action always runs
    let post = result.report.post_run.as_ref().unwrap();
    assert_eq!(post.outcome, Outcome::Failure);
    assert_eq!(post.reason.as_deref(), Some("webhook down"));
    assert_verdict(&result, Verdict::Success);
    assert_eq!(result.report.exit_code(), 0);
}

#[tokio::test]
async fn test_post_run_panic_is_reported_as_failure() {
    let mut pipeline = pipeline(
        r#"
name: "panicking"
jobs:
  build: {}
post_run:
  name: notify
"#,
    );
    let runner = ScriptedRunner::new().script("notify", Script::Panic);
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    let post = result.report.post_run.as_ref().unwrap();
    assert_eq!(post.outcome, Outcome::Failure);
    assert_eq!(post.reason.as_deref(), Some("step runner panicked"));
    assert_eq!(result.outcome("build"), Outcome::Success);
    assert_verdict(&result, Verdict::Success);
}

#[tokio::test]
async fn test_post_run_runs_at_most_once() {
    let mut pipeline = pipeline(
        r#"
name: "once"
jobs:
  build: {}
post_run:
  name: notify
"#,
    );
    let first = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;
    assert!(first.report.post_run.is_some());
    assert!(first.runner.ran("notify"));

    // Executing the same pipeline again finds the action already used
    let second = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;
    assert!(second.report.post_run.is_none());
    assert!(!second.runner.ran("notify"));
}

#[test]
fn test_post_run_with_unknown_need_is_rejected() {
    let yaml = r#"
name: "bad"
jobs:
  build: {}
post_run:
  name: notify
  needs: [deploy]
"#;
    let err = jobflow::core::config::PipelineConfig::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("deploy"));
}
