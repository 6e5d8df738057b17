//! Test: Concurrency - the running-instance bound and dispatch order

use crate::helpers::*;
use jobflow::core::Verdict;
use jobflow::execution::SchedulingStrategy;
use std::time::Duration;

const WIDE: &str = r#"
name: "wide"
jobs:
  shard:
    matrix:
      n: ["1", "2", "3", "4", "5", "6"]
  merge:
    depends_on: [shard]
"#;

#[tokio::test]
async fn test_limited_parallel_never_exceeds_bound() {
    let mut pipeline = pipeline(WIDE);
    let runner = ScriptedRunner::new().with_delay(Duration::from_millis(40));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::LimitedParallel(2)).await;

    assert_eq!(result.runner.max_concurrency(), 2);
    assert_eq!(result.runner.started().len(), 7);
    assert_verdict(&result, Verdict::Success);

    // Queued instances leave in matrix order
    let started = result.runner.started();
    let expected: Vec<String> = (1..=6).map(|n| format!("shard (n={})", n)).collect();
    assert_eq!(&started[..6], expected.as_slice());
    assert_eq!(started[6], "merge");
}

#[tokio::test]
async fn test_unbounded_parallel_runs_ready_instances_together() {
    let mut pipeline = pipeline(WIDE);
    let runner = ScriptedRunner::new().with_delay(Duration::from_millis(50));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.runner.max_concurrency(), 6);
}

#[tokio::test]
async fn test_configured_max_parallel_caps_parallel_strategy() {
    let mut pipeline = pipeline(&WIDE.replace("name: \"wide\"", "name: \"wide\"\nmax_parallel: 3"));
    assert_eq!(pipeline.max_parallel, Some(3));

    let runner = ScriptedRunner::new().with_delay(Duration::from_millis(40));
    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel).await;

    assert_eq!(result.runner.max_concurrency(), 3);
}

#[tokio::test]
async fn test_sequential_runs_one_at_a_time() {
    let mut pipeline = pipeline(WIDE);
    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Sequential).await;

    assert_eq!(result.runner.max_concurrency(), 1);
    assert_verdict(&result, Verdict::Success);
}
