//! Test: Matrix - expansion, exclusions and collapsed jobs

use crate::helpers::*;
use jobflow::core::{DefinitionError, Outcome, Verdict};
use jobflow::execution::SchedulingStrategy;

#[tokio::test]
async fn test_matrix_expands_with_exclusions() {
    let mut pipeline = pipeline(
        r#"
name: "matrix"
jobs:
  test:
    matrix:
      os: [linux, macos]
      py: ["3.10", "3.11"]
      exclude:
        - os: macos
          py: "3.10"
  deploy:
    depends_on: [test]
"#,
    );
    assert_eq!(pipeline.instances_of("test").count(), 3);

    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Sequential).await;

    assert_eq!(
        result.runner.started(),
        vec![
            "test (os=linux, py=3.10)",
            "test (os=linux, py=3.11)",
            "test (os=macos, py=3.11)",
            "deploy",
        ]
    );
    assert!(result.report.instance("test (os=macos, py=3.10)").is_none());
    for name in ["test (os=linux, py=3.10)", "test (os=linux, py=3.11)", "test (os=macos, py=3.11)"] {
        assert!(result.runner.finished_before(name, "deploy"));
    }
    assert_verdict(&result, Verdict::Success);
}

#[tokio::test]
async fn test_one_failed_coordinate_skips_dependents() {
    let mut pipeline = pipeline(
        r#"
name: "matrix-failure"
jobs:
  test:
    matrix:
      os: [linux, macos, windows]
  deploy:
    depends_on: [test]
  cleanup:
    depends_on: [test]
    if: "failure()"
"#,
    );
    let runner = ScriptedRunner::new().script("test (os=windows)", Script::Fail("exit code 1"));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.outcome("test (os=linux)"), Outcome::Success);
    assert_eq!(result.outcome("test (os=windows)"), Outcome::Failure);
    assert_eq!(result.outcome("deploy"), Outcome::Skipped);
    assert_eq!(result.outcome("cleanup"), Outcome::Success);
    assert_verdict(&result, Verdict::Failure);
}

#[tokio::test]
async fn test_empty_axis_collapses_job() {
    let mut pipeline = pipeline(
        r#"
name: "collapsed"
jobs:
  docs:
    matrix:
      lang: []
  publish:
    depends_on: [docs]
  report:
    depends_on: [docs]
    if: "always()"
"#,
    );
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;

    assert!(result.report.instance("docs").is_none());
    assert_eq!(result.report.collapsed_jobs.len(), 1);
    assert_eq!(result.report.collapsed_jobs[0].job_id, "docs");

    // The collapsed job counts as skipped for its dependents
    assert_eq!(result.outcome("publish"), Outcome::Skipped);
    assert_eq!(result.outcome("report"), Outcome::Success);
    assert_verdict(&result, Verdict::Success);
}

#[tokio::test]
async fn test_fully_excluded_matrix_collapses_job() {
    let mut pipeline = pipeline(
        r#"
name: "excluded"
jobs:
  test:
    matrix:
      os: [linux]
      exclude:
        - os: linux
  deploy:
    depends_on: [test]
"#,
    );
    assert_eq!(pipeline.instances_of("test").count(), 0);

    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;

    assert_eq!(result.report.collapsed_jobs.len(), 1);
    assert_eq!(result.report.collapsed_jobs[0].job_id, "test");
    assert_eq!(result.report.collapsed_jobs[0].reason, "every matrix coordinate excluded");

    // Nothing ran for test, so deploy's success() gate is not met
    assert_eq!(result.outcome("deploy"), Outcome::Skipped);
    assert!(!result.runner.ran("deploy"));
    assert_verdict(&result, Verdict::Success);
}

#[test]
fn test_empty_exclusion_rule_is_rejected() {
    let yaml = r#"
name: "typo"
jobs:
  test:
    matrix:
      os: [a, b]
      exclude:
        - {}
"#;
    let err = jobflow::core::config::PipelineConfig::from_yaml(yaml).unwrap_err();
    match err.downcast_ref::<DefinitionError>() {
        Some(DefinitionError::MalformedMatrix { job, .. }) => assert_eq!(job, "test"),
        other => panic!("expected a malformed matrix, got {:?}", other),
    }
}
