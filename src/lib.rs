//! jobflow - CI pipeline orchestration: job DAGs, matrices, conditions and caches

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use cache::{CacheStore, FilesystemCacheStore, InMemoryCacheStore};
pub use core::{DefinitionError, JobDefinition, Outcome, Pipeline, TriggerContext, Verdict};
pub use execution::{ExecutionEngine, ExecutionEvent, ExecutionReport, SchedulingStrategy};
pub use runner::{StepContext, StepError, StepRunner, StepStatus};
