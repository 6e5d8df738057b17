//! Test: Cache restore - key resolution, fallback probing and saving

use crate::helpers::*;
use jobflow::cache::{self, CacheStore, InMemoryCacheStore};
use jobflow::core::{Outcome, Verdict};
use jobflow::execution::{ExecutionEngine, SchedulingStrategy};
use jobflow::runner::CachingStepRunner;
use std::sync::Arc;

const FALLBACKS: &str = r#"
name: "cached"
jobs:
  build:
    cache:
      key: "K1"
      restore_keys: ["K2", "K3"]
      paths: ["target"]
"#;

fn archive(files: &[(&str, &str)]) -> Vec<u8> {
    let src = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();
    for (path, contents) in files {
        let full = src.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, contents).unwrap();
        paths.push(path.to_string());
    }
    cache::archive::pack(src.path(), &paths).unwrap()
}

#[tokio::test]
async fn test_only_last_fallback_in_store_is_restored() {
    let store = Arc::new(InMemoryCacheStore::new());
    store.put("K3", archive(&[("target/out.txt", "from K3")])).await.unwrap();

    // Probing in declared order finds K3 first
    let mut pipeline = pipeline(FALLBACKS);
    let chain = pipeline.cache_chain(0).unwrap();
    assert_eq!(chain.keys, vec!["K1", "K2", "K3"]);
    let hit = cache::restore(store.as_ref(), &chain).await.unwrap().unwrap();
    assert_eq!(hit.matched_key, "K3");
    assert!(!hit.exact);

    let workdir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let engine = ExecutionEngine::new(
        CachingStepRunner::new(runner.clone(), store.clone(), workdir.path()),
        SchedulingStrategy::Parallel,
    );
    let report = engine.execute(&mut pipeline).await.unwrap();

    assert_eq!(report.verdict, Verdict::Success);
    assert_eq!(
        std::fs::read_to_string(workdir.path().join("target/out.txt")).unwrap(),
        "from K3"
    );
    // A fallback hit is not an exact hit, so the job saves under K1
    assert_eq!(runner.env_of("build", "JOBFLOW_CACHE_HIT").as_deref(), Some("false"));
    assert_eq!(store.keys().await, vec!["K1", "K3"]);
}

#[tokio::test]
async fn test_second_run_hits_primary_key() {
    let store = Arc::new(InMemoryCacheStore::new());
    let workdir = tempfile::tempdir().unwrap();

    for expected in ["false", "true"] {
        let mut pipeline = pipeline(FALLBACKS);
        let runner = Arc::new(ScriptedRunner::new());
        let engine = ExecutionEngine::new(
            CachingStepRunner::new(runner.clone(), store.clone(), workdir.path()),
            SchedulingStrategy::Parallel,
        );
        engine.execute(&mut pipeline).await.unwrap();
        assert_eq!(runner.env_of("build", "JOBFLOW_CACHE_HIT").as_deref(), Some(expected));
    }
    assert_eq!(store.keys().await, vec!["K1"]);
}

#[tokio::test]
async fn test_failed_job_does_not_save() {
    let store = Arc::new(InMemoryCacheStore::new());
    let workdir = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline(FALLBACKS);

    let runner = Arc::new(ScriptedRunner::new().script("build", Script::Fail("exit code 1")));
    let engine = ExecutionEngine::new(
        CachingStepRunner::new(runner.clone(), store.clone(), workdir.path()),
        SchedulingStrategy::Parallel,
    );
    let report = engine.execute(&mut pipeline).await.unwrap();

    assert_eq!(report.instance("build").unwrap().outcome, Outcome::Failure);
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn test_unresolved_placeholder_is_reported() {
    let mut pipeline = pipeline(
        r#"
name: "placeholders"
jobs:
  build:
    matrix:
      os: [linux]
    cache:
      key: "deps-${{ matrix.os }}-${{ hashFiles }}"
      paths: ["vendor"]
"#,
    );
    let chain = pipeline.cache_chain(0).unwrap();
    assert_eq!(chain.keys, vec!["deps-linux-"]);
    assert_eq!(chain.unresolved, vec!["hashFiles"]);

    let result = run_pipeline(&mut pipeline, ScriptedRunner::new(), SchedulingStrategy::Parallel).await;
    assert_eq!(result.report.warnings.len(), 1);
    assert!(result.report.warnings[0].contains("hashFiles"));
    assert_verdict(&result, Verdict::Success);
}
