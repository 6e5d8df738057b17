//! Step runners - execute the opaque step sequence of one job instance

pub mod cached;
pub mod shell;

use crate::core::{cache_key::CacheKeyChain, job::Coordinate, TriggerContext};
use async_trait::async_trait;
use serde_yaml::Value;
use thiserror::Error;

pub use cached::CachingStepRunner;
pub use shell::ShellStepRunner;

/// Error types for step execution.
///
/// Any of these turns the instance into a Failure; they never abort the
/// pipeline.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Failed to spawn step: {0}")]
    Spawn(String),

    #[error("Invalid step definition: {0}")]
    InvalidStep(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(String),
}

/// How a step sequence ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failure(String),
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Success)
    }
}

/// Cache binding of an instance: resolved keys plus the paths they cover
#[derive(Debug, Clone)]
pub struct StepCache {
    pub chain: CacheKeyChain,
    pub paths: Vec<String>,
}

/// Everything a runner may know about the instance it runs
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: String,

    /// Display name, e.g. `test (os=linux)`
    pub instance: String,

    pub coordinate: Coordinate,
    pub trigger: TriggerContext,
    pub cache: Option<StepCache>,

    /// Extra environment for the steps, in insertion order
    pub env: Vec<(String, String)>,
}

impl StepContext {
    pub fn new(job_id: impl Into<String>, coordinate: Coordinate, trigger: TriggerContext) -> Self {
        let job_id = job_id.into();
        let instance = if coordinate.is_empty() {
            job_id.clone()
        } else {
            format!("{} ({})", job_id, coordinate)
        };
        Self {
            job_id,
            instance,
            coordinate,
            trigger,
            cache: None,
            env: Vec::new(),
        }
    }

    pub fn with_cache(mut self, cache: StepCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
    }
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the step sequence of one instance to completion
    async fn run(&self, steps: &Value, ctx: &StepContext) -> Result<StepStatus, StepError>;
}

#[async_trait]
impl<R: StepRunner + ?Sized> StepRunner for std::sync::Arc<R> {
    async fn run(&self, steps: &Value, ctx: &StepContext) -> Result<StepStatus, StepError> {
        (**self).run(steps, ctx).await
    }
}
