//! Test: Success Chain - dependencies, barrier and aggregation

use crate::helpers::*;
use chrono::Utc;
use jobflow::core::{Outcome, Verdict};
use jobflow::execution::aggregator::{self, AggregationError};
use jobflow::execution::SchedulingStrategy;
use uuid::Uuid;

const DIAMOND: &str = r#"
name: "diamond"
jobs:
  checkout: {}
  build:
    depends_on: [checkout]
  lint:
    depends_on: [checkout]
  package:
    depends_on: [build, lint]
"#;

#[tokio::test]
async fn test_dependents_start_after_dependencies_finish() {
    let mut pipeline = pipeline(DIAMOND);
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;

    assert_verdict(&result, Verdict::Success);
    assert_eq!(result.report.exit_code(), 0);
    assert_all_terminal(&result);

    let runner = &result.runner;
    assert!(runner.finished_before("checkout", "build"));
    assert!(runner.finished_before("checkout", "lint"));
    assert!(runner.finished_before("build", "package"));
    assert!(runner.finished_before("lint", "package"));
    assert_eq!(runner.started().last().map(String::as_str), Some("package"));
}

#[tokio::test]
async fn test_report_carries_timestamps_for_every_instance() {
    let mut pipeline = pipeline(DIAMOND);
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Sequential).await;

    assert_eq!(result.report.instances.len(), 4);
    for inst in &result.report.instances {
        assert_eq!(inst.outcome, Outcome::Success);
        let (Some(started), Some(finished)) = (inst.started_at, inst.finished_at) else {
            panic!("instance {} is missing timestamps", inst.name);
        };
        assert!(started <= finished);
    }
    assert!(result.report.started_at <= result.report.finished_at);
}

#[tokio::test]
async fn test_sequential_dispatch_follows_rank_then_declaration() {
    let mut pipeline = pipeline(
        r#"
name: "ordering"
jobs:
  zeta:
    depends_on: [alpha]
  alpha: {}
  beta: {}
  gamma:
    depends_on: [beta]
"#,
    );
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Sequential).await;

    assert_eq!(result.runner.started(), vec!["alpha", "beta", "zeta", "gamma"]);
}

#[tokio::test]
async fn test_aggregation_only_happens_at_the_barrier() {
    let mut pipeline = pipeline(DIAMOND);

    // Before the run nothing is terminal, so aggregation must refuse
    let early = aggregator::aggregate(&pipeline, Uuid::new_v4(), Utc::now(), Vec::new(), None);
    assert!(matches!(
        early,
        Err(AggregationError::NonTerminal { ref instances }) if instances.len() == 4
    ));

    // The engine never reaches that error
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;
    assert_all_terminal(&result);
    assert!(pipeline.is_complete());
}

#[tokio::test]
async fn test_empty_pipeline_succeeds() {
    let mut pipeline = pipeline("name: \"empty\"\njobs: {}\n");
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;

    assert_verdict(&result, Verdict::Success);
    assert!(result.report.instances.is_empty());
}
