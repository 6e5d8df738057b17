//! Status aggregation - folds instance outcomes into a pipeline verdict

use crate::core::{
    error::DefinitionError,
    graph::JobGraph,
    job::{Coordinate, JobDefinition},
    state::{Outcome, Verdict},
    Pipeline, TriggerContext,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Jobs whose failure fails the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CriticalSet {
    /// Every job is critical
    All,
    /// Only the named jobs are critical
    Only(BTreeSet<String>),
}

impl Default for CriticalSet {
    fn default() -> Self {
        CriticalSet::All
    }
}

impl CriticalSet {
    /// Build from the `critical` flag of each definition
    pub fn from_definitions(definitions: &[JobDefinition]) -> Self {
        if definitions.iter().all(|d| d.critical) {
            CriticalSet::All
        } else {
            CriticalSet::Only(
                definitions
                    .iter()
                    .filter(|d| d.critical)
                    .map(|d| d.id.clone())
                    .collect(),
            )
        }
    }

    pub fn only<I, S>(jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CriticalSet::Only(jobs.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        match self {
            CriticalSet::All => true,
            CriticalSet::Only(jobs) => jobs.contains(job_id),
        }
    }

    /// Every named job must exist, or a typo would silently make real
    /// failures non-critical
    pub fn validate(&self, graph: &JobGraph) -> Result<(), DefinitionError> {
        match self {
            CriticalSet::All => Ok(()),
            CriticalSet::Only(jobs) => match jobs.iter().find(|id| !graph.contains(id)) {
                Some(missing) => Err(DefinitionError::UnknownCriticalJob(missing.clone())),
                None => Ok(()),
            },
        }
    }
}

/// Aggregation attempted while instances were still in flight
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Cannot aggregate: {} instance(s) not terminal: {}", instances.len(), instances.join(", "))]
    NonTerminal { instances: Vec<String> },
}

/// Final state of one instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub job_id: String,
    pub coordinate: Coordinate,
    pub name: String,
    pub outcome: Outcome,
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub critical: bool,
}

/// A job that produced no instances
#[derive(Debug, Clone, Serialize)]
pub struct CollapsedJob {
    pub job_id: String,
    pub reason: String,
}

/// What happened to the post-run action
#[derive(Debug, Clone, Serialize)]
pub struct PostRunReport {
    pub name: String,
    pub outcome: Outcome,
    pub reason: Option<String>,
}

/// Result of a pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub trigger: TriggerContext,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub instances: Vec<InstanceReport>,
    pub collapsed_jobs: Vec<CollapsedJob>,
    pub warnings: Vec<String>,
    pub post_run: Option<PostRunReport>,
    pub verdict: Verdict,
}

impl ExecutionReport {
    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    /// Instances that did not succeed
    pub fn non_success(&self) -> impl Iterator<Item = &InstanceReport> {
        self.instances
            .iter()
            .filter(|i| i.outcome != Outcome::Success)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.instances.iter().filter(|i| i.outcome == outcome).count()
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceReport> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// Human-readable summary naming every instance that did not succeed
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Pipeline '{}' finished: {:?} ({} succeeded, {} failed, {} skipped, {} cancelled)",
            self.pipeline_name,
            self.verdict,
            self.count(Outcome::Success),
            self.count(Outcome::Failure),
            self.count(Outcome::Skipped),
            self.count(Outcome::Cancelled),
        )];

        for inst in self.non_success() {
            let critical = if inst.critical { "" } else { " [non-critical]" };
            match &inst.reason {
                Some(reason) => lines.push(format!(
                    "  {:?}: {}{} ({})",
                    inst.outcome, inst.name, critical, reason
                )),
                None => lines.push(format!("  {:?}: {}{}", inst.outcome, inst.name, critical)),
            }
        }
        for job in &self.collapsed_jobs {
            lines.push(format!("  Skipped: {} ({})", job.job_id, job.reason));
        }
        lines.join("\n")
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Fold terminal outcomes into a verdict.
///
/// A failed critical instance wins over cancellation, which wins over
/// success. Skipped instances never fail the pipeline.
pub fn verdict<'a, I>(outcomes: I, critical: &CriticalSet) -> Verdict
where
    I: IntoIterator<Item = (&'a str, Outcome)>,
{
    let mut cancelled = false;
    for (job_id, outcome) in outcomes {
        match outcome {
            Outcome::Failure if critical.contains(job_id) => return Verdict::Failure,
            Outcome::Cancelled => cancelled = true,
            _ => {}
        }
    }
    if cancelled {
        Verdict::Cancelled
    } else {
        Verdict::Success
    }
}

/// Build the execution report once every instance is terminal
pub fn aggregate(
    pipeline: &Pipeline,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    warnings: Vec<String>,
    post_run: Option<PostRunReport>,
) -> Result<ExecutionReport, AggregationError> {
    let pending: Vec<String> = pipeline
        .instances
        .iter()
        .filter(|i| !i.state.outcome.is_terminal())
        .map(|i| i.name())
        .collect();
    if !pending.is_empty() {
        return Err(AggregationError::NonTerminal { instances: pending });
    }

    let verdict = verdict(
        pipeline
            .instances
            .iter()
            .map(|i| (i.job_id.as_str(), i.state.outcome)),
        &pipeline.critical,
    );

    let instances = pipeline
        .instances
        .iter()
        .map(|i| InstanceReport {
            job_id: i.job_id.clone(),
            coordinate: i.coordinate.clone(),
            name: i.name(),
            outcome: i.state.outcome,
            reason: i.state.reason.clone(),
            started_at: i.state.started_at,
            finished_at: i.state.finished_at,
            critical: pipeline.critical.contains(&i.job_id),
        })
        .collect();

    let collapsed_jobs = pipeline
        .collapsed
        .iter()
        .map(|(job_id, reason)| CollapsedJob {
            job_id: job_id.clone(),
            reason: reason.clone(),
        })
        .collect();

    Ok(ExecutionReport {
        run_id,
        pipeline_name: pipeline.name.clone(),
        trigger: pipeline.trigger.clone(),
        started_at,
        finished_at: Utc::now(),
        instances,
        collapsed_jobs,
        warnings,
        post_run,
        verdict,
    })
}
