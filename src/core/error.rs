//! Error types for pipeline definitions and instance lifecycle

use crate::core::state::Outcome;
use thiserror::Error;

/// A pipeline definition that cannot be executed.
///
/// Raised before any instance is dispatched; every variant names the
/// offending job id(s).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Duplicate job ID: {0}")]
    DuplicateJob(String),

    #[error("Job '{job}' depends on non-existent job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cycle detected in dependency graph: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Job '{job}' has a malformed condition: {message}")]
    MalformedCondition { job: String, message: String },

    #[error("Job '{job}' has a malformed matrix: {message}")]
    MalformedMatrix { job: String, message: String },

    #[error("Job '{job}' has a malformed cache: {message}")]
    MalformedCache { job: String, message: String },

    #[error("Critical job '{0}' does not exist")]
    UnknownCriticalJob(String),
}

impl DefinitionError {
    /// Job ids this error refers to
    pub fn job_ids(&self) -> Vec<&str> {
        match self {
            DefinitionError::DuplicateJob(job) | DefinitionError::UnknownCriticalJob(job) => {
                vec![job.as_str()]
            }
            DefinitionError::UnknownDependency { job, .. } => vec![job.as_str()],
            DefinitionError::Cycle { path } => {
                let mut ids: Vec<&str> = path.iter().map(String::as_str).collect();
                // The path closes on its first element
                ids.dedup();
                if ids.len() > 1 && ids.first() == ids.last() {
                    ids.pop();
                }
                ids
            }
            DefinitionError::MalformedCondition { job, .. }
            | DefinitionError::MalformedMatrix { job, .. }
            | DefinitionError::MalformedCache { job, .. } => vec![job.as_str()],
        }
    }
}

/// A condition referenced trigger context that is not there
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionEvaluationError {
    #[error("Condition references missing context field '{0}'")]
    MissingField(String),
}

/// An outcome change that would break the instance lifecycle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Instance '{instance}' cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub instance: String,
    pub from: Outcome,
    pub to: Outcome,
}
