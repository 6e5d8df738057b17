//! Post-run action - runs once after the whole DAG has finished

use crate::core::{
    condition::Condition, config::PostRunConfig, error::DefinitionError, graph::JobGraph,
    job::Coordinate, state::Outcome, Pipeline,
};
use crate::execution::aggregator::PostRunReport;
use crate::runner::{StepContext, StepRunner, StepStatus};
use serde_yaml::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A notification or cleanup action gated by the final job outcomes.
///
/// The action is invoked at most once per run, no matter how many times
/// [`PostRunAction::invoke`] is called or how many clones exist.
#[derive(Debug, Clone)]
pub struct PostRunAction {
    pub name: String,
    pub condition: Condition,

    /// Jobs whose outcomes feed the condition; `None` means every job
    pub needs: Option<Vec<String>>,

    pub steps: Value,
    invoked: Arc<AtomicBool>,
}

impl PostRunAction {
    pub fn new(name: impl Into<String>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            condition,
            needs: None,
            steps: Value::Null,
            invoked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_needs(mut self, needs: &[&str]) -> Self {
        self.needs = Some(needs.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_steps(mut self, steps: Value) -> Self {
        self.steps = steps;
        self
    }

    /// Validate a post-run configuration against the job graph
    pub fn from_config(config: &PostRunConfig, graph: &JobGraph) -> Result<Self, DefinitionError> {
        let condition = match &config.condition {
            Some(source) => {
                Condition::parse(source).map_err(|message| DefinitionError::MalformedCondition {
                    job: config.name.clone(),
                    message,
                })?
            }
            None => Condition::Always,
        };

        if let Some(needs) = &config.needs {
            if let Some(missing) = needs.iter().find(|n| !graph.contains(n)) {
                return Err(DefinitionError::UnknownDependency {
                    job: config.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        Ok(Self {
            name: config.name.clone(),
            condition,
            needs: config.needs.clone(),
            steps: config.steps.clone(),
            invoked: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn was_invoked(&self) -> bool {
        self.invoked.load(Ordering::SeqCst)
    }

    fn outcomes(&self, pipeline: &Pipeline) -> Vec<Outcome> {
        match &self.needs {
            Some(needs) => pipeline.outcomes_of(needs),
            None => pipeline.outcomes_of(pipeline.graph().declared()),
        }
    }

    /// Evaluate the gate and run the steps.
    ///
    /// Returns `None` if the action already ran. The outcome is reported
    /// but never changes the pipeline verdict.
    pub async fn invoke<R: StepRunner + ?Sized + 'static>(
        &self,
        runner: Arc<R>,
        pipeline: &Pipeline,
    ) -> Option<PostRunReport> {
        if self.invoked.swap(true, Ordering::SeqCst) {
            warn!("Post-run action '{}' already invoked", self.name);
            return None;
        }

        let outcomes = self.outcomes(pipeline);
        let eligible = match self.condition.evaluate(&outcomes, &pipeline.trigger) {
            Ok(eligible) => eligible,
            Err(e) => {
                warn!("Post-run action '{}' skipped: {}", self.name, e);
                return Some(PostRunReport {
                    name: self.name.clone(),
                    outcome: Outcome::Skipped,
                    reason: Some(e.to_string()),
                });
            }
        };

        if !eligible {
            info!("Post-run action '{}' skipped: condition not met", self.name);
            return Some(PostRunReport {
                name: self.name.clone(),
                outcome: Outcome::Skipped,
                reason: Some(format!("condition `{}` not met", self.condition)),
            });
        }

        info!("Running post-run action '{}'", self.name);
        let ctx = StepContext::new(self.name.clone(), Coordinate::default(), pipeline.trigger.clone());
        let steps = self.steps.clone();

        // Own task so a panicking runner surfaces as a JoinError
        let handle = tokio::spawn(async move { runner.run(&steps, &ctx).await });
        let (outcome, reason) = match handle.await {
            Ok(Ok(StepStatus::Success)) => (Outcome::Success, None),
            Ok(Ok(StepStatus::Failure(reason))) => (Outcome::Failure, Some(reason)),
            Ok(Err(e)) => (Outcome::Failure, Some(e.to_string())),
            Err(e) if e.is_panic() => (Outcome::Failure, Some("step runner panicked".to_string())),
            Err(e) => (Outcome::Failure, Some(e.to_string())),
        };
        if outcome == Outcome::Failure {
            warn!(
                "Post-run action '{}' failed: {}",
                self.name,
                reason.as_deref().unwrap_or("unknown")
            );
        }

        Some(PostRunReport {
            name: self.name.clone(),
            outcome,
            reason,
        })
    }
}
