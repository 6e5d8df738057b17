//! CLI command definitions

use crate::core::{graph::JobGraph, DefinitionError, TriggerContext};
use crate::execution::{CriticalSet, SchedulingStrategy};
use clap::Args;
use std::path::PathBuf;

/// Flags describing what triggered the run
#[derive(Debug, Args, Clone, Default)]
pub struct TriggerArgs {
    /// Trigger event (defaults to $JOBFLOW_EVENT or "manual")
    #[arg(long)]
    pub event: Option<String>,

    /// Branch (defaults to $JOBFLOW_BRANCH)
    #[arg(long)]
    pub branch: Option<String>,

    /// Mark the run as belonging to a pull request
    #[arg(long)]
    pub pull_request: bool,

    /// Trigger metadata (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub meta: Vec<(String, String)>,
}

impl TriggerArgs {
    /// Trigger context from flags, falling back to the environment
    pub fn to_context(&self) -> TriggerContext {
        let mut trigger = TriggerContext::from_env();
        if let Some(event) = &self.event {
            trigger.event = event.clone();
        }
        if let Some(branch) = &self.branch {
            trigger.branch = branch.clone();
        }
        if self.pull_request {
            trigger.is_pull_request = true;
        }
        for (key, value) in &self.meta {
            trigger.metadata.insert(key.clone(), value.clone());
        }
        trigger
    }
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Concurrency bound for parallel-limited
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Skip unsatisfiable work as soon as any instance fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Jobs whose failure fails the pipeline (repeatable; default from config)
    #[arg(long)]
    pub critical: Vec<String>,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// Cache directory (defaults to the user cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Write the JSON execution report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print the JSON execution report instead of a summary
    #[arg(long)]
    pub json: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_parallel)
            }
        }
    }

    /// Critical set override, if any `--critical` flag was given.
    ///
    /// Every id must name a job in `graph`.
    pub fn critical_override(&self, graph: &JobGraph) -> Result<Option<CriticalSet>, DefinitionError> {
        if self.critical.is_empty() {
            return Ok(None);
        }
        let critical = CriticalSet::only(self.critical.iter().cloned());
        critical.validate(graph)?;
        Ok(Some(critical))
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the expanded instances and dispatch order
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run ID
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
