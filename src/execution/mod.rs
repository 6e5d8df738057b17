//! Pipeline execution engine

pub mod aggregator;
pub mod engine;
pub mod post_run;
pub mod scheduler;

pub use aggregator::{CriticalSet, ExecutionReport, InstanceReport};
pub use engine::{CancelHandle, EngineError, ExecutionEngine, ExecutionEvent};
pub use post_run::PostRunAction;
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
