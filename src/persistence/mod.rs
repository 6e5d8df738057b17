//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{state::Outcome, Verdict};
use crate::execution::ExecutionReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Aggregated verdict
    pub verdict: Verdict,

    /// Trigger event and branch
    pub event: String,
    pub branch: String,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Instance counts by outcome
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl RunSummary {
    /// Create a summary from an execution report
    pub fn from_report(report: &ExecutionReport) -> Self {
        Self {
            run_id: report.run_id,
            pipeline_name: report.pipeline_name.clone(),
            verdict: report.verdict,
            event: report.trigger.event.clone(),
            branch: report.trigger.branch.clone(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            succeeded: report.count(Outcome::Success),
            failed: report.count(Outcome::Failure),
            skipped: report.count(Outcome::Skipped),
            cancelled: report.count(Outcome::Cancelled),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.cancelled
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a finished run
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<std::collections::HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let mut runs: Vec<RunSummary> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .runs
            .read()
            .await
            .values()
            .map(|r| r.pipeline_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
