//! Execution scheduler - decides which instances become eligible and which
//! run next

use crate::core::{
    condition::Eligibility, error::ConditionEvaluationError, state::Outcome, Pipeline,
};
use std::collections::HashSet;

/// Strategy for scheduling instance execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One instance at a time, in dispatch order
    #[default]
    Sequential,

    /// Every eligible instance at once
    Parallel,

    /// Limited parallelism (max N concurrent instances)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Upper bound on simultaneously running instances
    pub fn max_concurrent(&self) -> Option<usize> {
        match self {
            SchedulingStrategy::Sequential => Some(1),
            SchedulingStrategy::Parallel => None,
            SchedulingStrategy::LimitedParallel(max) => Some((*max).max(1)),
        }
    }
}

/// A decision the scheduler made about a pending instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Dependencies are terminal and the condition holds
    Ready(usize),

    /// The instance will never run
    Skip {
        index: usize,
        reason: String,
        warning: Option<ConditionEvaluationError>,
    },
}

/// Scheduler for determining which instances to run
#[derive(Debug)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,

    /// Eligible instances waiting for a slot
    ready: Vec<usize>,

    /// Instances already decided on
    decided: HashSet<usize>,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self {
            strategy,
            ready: Vec::new(),
            decided: HashSet::new(),
        }
    }

    /// Evaluate every pending instance whose dependencies are all terminal.
    ///
    /// Eligible instances join the ready queue; the rest are returned as
    /// skips for the caller to apply. An instance is decided at most once.
    pub fn evaluate(&mut self, pipeline: &Pipeline) -> Vec<Decision> {
        let mut decisions = Vec::new();

        for (idx, inst) in pipeline.instances.iter().enumerate() {
            if inst.state.outcome != Outcome::Pending || self.decided.contains(&idx) {
                continue;
            }

            let outcomes = pipeline.dependency_outcomes(idx);
            if !outcomes.iter().all(Outcome::is_terminal) {
                continue;
            }

            let Some(def) = pipeline.definition(&inst.job_id) else {
                continue;
            };

            self.decided.insert(idx);
            match def.condition.eligibility(&outcomes, &pipeline.trigger) {
                Eligibility::Eligible => {
                    self.ready.push(idx);
                    decisions.push(Decision::Ready(idx));
                }
                Eligibility::NotEligible { warning } => {
                    let reason = match &warning {
                        Some(e) => e.to_string(),
                        None => format!("condition `{}` not met", def.condition),
                    };
                    decisions.push(Decision::Skip {
                        index: idx,
                        reason,
                        warning,
                    });
                }
            }
        }

        decisions
    }

    /// Instances that can no longer become eligible whatever their running
    /// dependencies end up doing. Used once fail-fast has triggered.
    pub fn prune_unsatisfiable(&mut self, pipeline: &Pipeline) -> Vec<Decision> {
        let mut decisions = Vec::new();

        for (idx, inst) in pipeline.instances.iter().enumerate() {
            if inst.state.outcome != Outcome::Pending || self.decided.contains(&idx) {
                continue;
            }
            let Some(def) = pipeline.definition(&inst.job_id) else {
                continue;
            };

            let outcomes = pipeline.dependency_outcomes(idx);
            if let Ok(Some(false)) = def.condition.evaluate_partial(&outcomes, &pipeline.trigger) {
                self.decided.insert(idx);
                decisions.push(Decision::Skip {
                    index: idx,
                    reason: "fail-fast: condition can no longer be met".to_string(),
                    warning: None,
                });
            }
        }

        decisions
    }

    /// Take the next batch to dispatch given how many are running.
    ///
    /// Ready instances leave in dispatch-key order: topological rank,
    /// declaration order, then matrix index.
    pub fn next_batch(&mut self, pipeline: &Pipeline, running: usize) -> Vec<usize> {
        let slots = match self.strategy.max_concurrent() {
            Some(max) => max.saturating_sub(running),
            None => self.ready.len(),
        };
        if slots == 0 || self.ready.is_empty() {
            return Vec::new();
        }

        self.ready.sort_by_key(|&idx| pipeline.dispatch_key(idx));
        let take = slots.min(self.ready.len());
        self.ready.drain(..take).collect()
    }

    /// Drop every queued or undecided pending instance; returns them
    pub fn drain_pending(&mut self, pipeline: &Pipeline) -> Vec<usize> {
        self.ready.clear();
        let pending: Vec<usize> = pipeline
            .instances
            .iter()
            .enumerate()
            .filter(|(_, i)| i.state.outcome == Outcome::Pending)
            .map(|(idx, _)| idx)
            .collect();
        self.decided.extend(pending.iter().copied());
        pending
    }
}
