//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{error::TransitionError, state::Outcome, state::Verdict, Pipeline},
    execution::{
        aggregator::{self, AggregationError, ExecutionReport},
        scheduler::{Decision, ExecutionScheduler, SchedulingStrategy},
    },
    runner::{StepCache, StepContext, StepRunner, StepStatus},
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline_name: String,
        instances: usize,
    },
    InstanceStarted {
        instance: String,
    },
    InstanceFinished {
        instance: String,
        outcome: Outcome,
        reason: Option<String>,
    },
    InstanceSkipped {
        instance: String,
        reason: String,
    },
    InstanceCancelled {
        instance: String,
    },
    FailFastTriggered {
        instance: String,
    },
    PipelineCompleted {
        run_id: Uuid,
        verdict: Verdict,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Errors that abort a run. Step failures never do.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Scheduler stalled with pending instances: {}", pending.join(", "))]
    Stalled { pending: Vec<String> },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("Execution task lost: {0}")]
    TaskLost(String),
}

/// Cooperative, pre-dispatch cancellation.
///
/// Once triggered, no further instance is dispatched and every pending
/// instance becomes Cancelled. Running instances finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelHandle::cancel`] has been called
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Result of one dispatched instance
struct Finished {
    index: usize,
    outcome: Outcome,
    reason: Option<String>,
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    runner: Arc<R>,
    strategy: SchedulingStrategy,
    event_handlers: Vec<EventHandler>,
    cancel: CancelHandle,
}

impl<R: StepRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, strategy: SchedulingStrategy) -> Self {
        Self::with_shared_runner(Arc::new(runner), strategy)
    }

    pub fn with_shared_runner(runner: Arc<R>, strategy: SchedulingStrategy) -> Self {
        Self {
            runner,
            strategy,
            event_handlers: Vec::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    /// Use an externally owned cancel handle
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// A configured `max_parallel` caps an unbounded strategy
    fn effective_strategy(&self, pipeline: &Pipeline) -> SchedulingStrategy {
        match (self.strategy, pipeline.max_parallel) {
            (SchedulingStrategy::Parallel, Some(max)) => SchedulingStrategy::LimitedParallel(max),
            (strategy, _) => strategy,
        }
    }

    /// Execute the entire pipeline and aggregate the result
    pub async fn execute(&self, pipeline: &mut Pipeline) -> Result<ExecutionReport, EngineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let strategy = self.effective_strategy(pipeline);
        let mut scheduler = ExecutionScheduler::new(strategy);
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut warnings = Vec::new();
        let mut fail_fast_triggered = false;

        info!(
            "Starting pipeline execution: {} ({}) with {:?}",
            pipeline.name, run_id, strategy
        );
        self.emit_event(ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            instances: pipeline.instances.len(),
        });

        for (job_id, reason) in &pipeline.collapsed {
            info!("Job {} produces no instances: {}", job_id, reason);
        }

        // Main execution loop
        loop {
            if self.cancel.is_cancelled() {
                for idx in scheduler.drain_pending(pipeline) {
                    let name = pipeline.instances[idx].name();
                    pipeline.instances[idx].state.transition(
                        &name,
                        Outcome::Cancelled,
                        Some("run cancelled before dispatch".to_string()),
                    )?;
                    self.emit_event(ExecutionEvent::InstanceCancelled { instance: name });
                }
            }

            self.resolve_decisions(pipeline, &mut scheduler, &mut warnings)?;

            if !self.cancel.is_cancelled() {
                for idx in scheduler.next_batch(pipeline, tasks.len()) {
                    self.dispatch(pipeline, idx, &mut tasks, &mut warnings)?;
                }
            }

            if tasks.is_empty() {
                if pipeline.is_complete() {
                    break;
                }
                let pending = pipeline
                    .instances
                    .iter()
                    .filter(|i| !i.state.outcome.is_terminal())
                    .map(|i| i.name())
                    .collect();
                error!("No instances ready to run and none running - scheduler stalled");
                return Err(EngineError::Stalled { pending });
            }

            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = self.cancel.cancelled(), if !self.cancel.is_cancelled() => {
                    warn!("Cancellation requested; no further instances will start");
                    continue;
                }
            };

            let Some(joined) = joined else { continue };
            let finished = joined.map_err(|e| EngineError::TaskLost(e.to_string()))?;
            let name = pipeline.instances[finished.index].name();
            pipeline.instances[finished.index].state.transition(
                &name,
                finished.outcome,
                finished.reason.clone(),
            )?;

            match finished.outcome {
                Outcome::Success => info!("Instance {} succeeded", name),
                _ => warn!(
                    "Instance {} failed: {}",
                    name,
                    finished.reason.as_deref().unwrap_or("unknown error")
                ),
            }
            self.emit_event(ExecutionEvent::InstanceFinished {
                instance: name.clone(),
                outcome: finished.outcome,
                reason: finished.reason,
            });

            if finished.outcome == Outcome::Failure && pipeline.fail_fast && !fail_fast_triggered {
                fail_fast_triggered = true;
                warn!("Fail-fast triggered by {}", name);
                self.emit_event(ExecutionEvent::FailFastTriggered { instance: name });
            }
        }

        let post_run = match pipeline.post_run.clone() {
            Some(action) => action.invoke(self.runner.clone(), pipeline).await,
            None => None,
        };

        let report = aggregator::aggregate(pipeline, run_id, started_at, warnings, post_run)?;

        info!(
            "Pipeline execution finished: {} - {:?}",
            pipeline.name, report.verdict
        );
        self.emit_event(ExecutionEvent::PipelineCompleted {
            run_id,
            verdict: report.verdict,
        });

        Ok(report)
    }

    /// Apply scheduler decisions until no further instance can be decided.
    ///
    /// Skipping an instance makes its dependents decidable, so this loops
    /// to a fixpoint. Fail-fast pruning joins in once any instance failed.
    fn resolve_decisions(
        &self,
        pipeline: &mut Pipeline,
        scheduler: &mut ExecutionScheduler,
        warnings: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        loop {
            let mut decisions = scheduler.evaluate(pipeline);
            if pipeline.fail_fast && pipeline.has_failure() {
                decisions.extend(scheduler.prune_unsatisfiable(pipeline));
            }

            let mut skipped = false;
            for decision in decisions {
                let Decision::Skip {
                    index,
                    reason,
                    warning,
                } = decision
                else {
                    continue;
                };

                let name = pipeline.instances[index].name();
                if let Some(warning) = warning {
                    warn!("Instance {} skipped: {}", name, warning);
                    warnings.push(format!("{}: {}", name, warning));
                } else {
                    debug!("Instance {} skipped: {}", name, reason);
                }

                pipeline.instances[index].state.transition(
                    &name,
                    Outcome::Skipped,
                    Some(reason.clone()),
                )?;
                self.emit_event(ExecutionEvent::InstanceSkipped {
                    instance: name,
                    reason,
                });
                skipped = true;
            }

            if !skipped {
                return Ok(());
            }
        }
    }

    /// Move an instance to Running and spawn its step sequence
    fn dispatch(
        &self,
        pipeline: &mut Pipeline,
        index: usize,
        tasks: &mut JoinSet<Finished>,
        warnings: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        let instance = &pipeline.instances[index];
        let name = instance.name();
        let (steps, timeout_secs, cache_paths) = match pipeline.definition(&instance.job_id) {
            Some(def) => (
                def.steps.clone(),
                def.timeout_secs,
                def.cache.as_ref().map(|c| c.paths.clone()),
            ),
            None => (serde_yaml::Value::Null, None, None),
        };

        let mut ctx = StepContext::new(
            instance.job_id.clone(),
            instance.coordinate.clone(),
            pipeline.trigger.clone(),
        );
        if let (Some(chain), Some(paths)) = (pipeline.cache_chain(index), cache_paths) {
            if !chain.unresolved.is_empty() {
                warnings.push(format!(
                    "{}: cache key placeholders resolved to empty: {}",
                    name,
                    chain.unresolved.join(", ")
                ));
            }
            ctx = ctx.with_cache(StepCache { chain, paths });
        }

        pipeline.instances[index]
            .state
            .transition(&name, Outcome::Running, None)?;
        info!("Dispatching {}", name);
        self.emit_event(ExecutionEvent::InstanceStarted {
            instance: name.clone(),
        });

        let runner = self.runner.clone();
        tasks.spawn(async move {
            // Inner task so a panicking runner surfaces as a JoinError
            let mut handle = tokio::spawn(async move { runner.run(&steps, &ctx).await });

            let joined = match timeout_secs {
                Some(secs) => {
                    match tokio::time::timeout(Duration::from_secs(secs), &mut handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            handle.abort();
                            return Finished {
                                index,
                                outcome: Outcome::Failure,
                                reason: Some(format!("timed out after {}s", secs)),
                            };
                        }
                    }
                }
                None => handle.await,
            };

            let (outcome, reason) = match joined {
                Ok(Ok(StepStatus::Success)) => (Outcome::Success, None),
                Ok(Ok(StepStatus::Failure(reason))) => (Outcome::Failure, Some(reason)),
                Ok(Err(e)) => (Outcome::Failure, Some(e.to_string())),
                Err(e) if e.is_panic() => (Outcome::Failure, Some("step runner panicked".to_string())),
                Err(e) => (Outcome::Failure, Some(e.to_string())),
            };

            Finished {
                index,
                outcome,
                reason,
            }
        });

        Ok(())
    }
}
