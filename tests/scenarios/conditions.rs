//! Test: Conditions - trigger context predicates and fail-closed evaluation

use crate::helpers::*;
use jobflow::core::{Outcome, TriggerContext, Verdict};
use jobflow::execution::SchedulingStrategy;

const RELEASE: &str = r#"
name: "release"
jobs:
  build: {}
  deploy:
    depends_on: [build]
    if: "branch == 'main' && !is_pull_request"
  preview:
    depends_on: [build]
    if: "success() && is_pull_request"
  tag:
    depends_on: [build]
    if: "metadata.release == 'yes'"
"#;

#[tokio::test]
async fn test_push_to_main_deploys() {
    let trigger = TriggerContext::new("push", "main").with_metadata("release", "yes");
    let mut pipeline = pipeline_with_trigger(RELEASE, trigger);
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("deploy"), Outcome::Success);
    assert_eq!(result.outcome("preview"), Outcome::Skipped);
    assert_eq!(result.outcome("tag"), Outcome::Success);
    assert!(result.report.warnings.is_empty());
    assert_verdict(&result, Verdict::Success);
}

#[tokio::test]
async fn test_pull_request_previews() {
    let trigger = TriggerContext::new("pull_request", "feature/x")
        .with_pull_request(true)
        .with_metadata("release", "no");
    let mut pipeline = pipeline_with_trigger(RELEASE, trigger);
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("deploy"), Outcome::Skipped);
    assert_eq!(result.outcome("preview"), Outcome::Success);
    assert_eq!(result.outcome("tag"), Outcome::Skipped);
}

#[tokio::test]
async fn test_missing_metadata_skips_with_warning() {
    let mut pipeline = pipeline_with_trigger(RELEASE, TriggerContext::new("push", "main"));
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("tag"), Outcome::Skipped);
    assert!(!result.runner.ran("tag"));
    assert_eq!(result.report.warnings.len(), 1);
    assert!(result.report.warnings[0].starts_with("tag:"));
    assert!(result.report.warnings[0].contains("metadata.release"));

    // A skipped instance is not a failure
    assert_verdict(&result, Verdict::Success);
}

#[tokio::test]
async fn test_success_condition_never_runs_after_failure() {
    let mut pipeline = pipeline(
        r#"
name: "gate"
jobs:
  a: {}
  b: {}
  c:
    depends_on: [a, b]
    if: "success()"
"#,
    );
    let runner = ScriptedRunner::new().script("b", Script::Fail("exit code 1"));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Sequential).await;

    assert_eq!(result.outcome("c"), Outcome::Skipped);
    assert!(!result.runner.ran("c"));
}

#[tokio::test]
async fn test_always_runs_when_every_dependency_failed() {
    let mut pipeline = pipeline(
        r#"
name: "always"
jobs:
  a: {}
  b: {}
  report:
    depends_on: [a, b]
    if: "always()"
"#,
    );
    let runner = ScriptedRunner::new()
        .script("a", Script::Fail("exit code 1"))
        .script("b", Script::Error);
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("report"), Outcome::Success);
    assert!(result.runner.finished_before("a", "report"));
    assert!(result.runner.finished_before("b", "report"));
}
