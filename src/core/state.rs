//! Execution state models

use crate::core::error::TransitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Waiting for dependencies or a dispatch slot
    Pending,
    /// Step sequence is executing
    Running,
    /// Step sequence reported success
    Success,
    /// Step sequence failed, errored or timed out
    Failure,
    /// Condition was not met; the instance never ran
    Skipped,
    /// Cancelled before it was dispatched
    Cancelled,
}

impl Outcome {
    /// Check if the outcome is final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Success | Outcome::Failure | Outcome::Skipped | Outcome::Cancelled
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: Outcome) -> bool {
        matches!(
            (self, next),
            (Outcome::Pending, Outcome::Running)
                | (Outcome::Pending, Outcome::Skipped)
                | (Outcome::Pending, Outcome::Cancelled)
                | (Outcome::Running, Outcome::Success)
                | (Outcome::Running, Outcome::Failure)
        )
    }
}

/// Mutable state of a job instance; only the engine writes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    pub outcome: Outcome,

    /// When the instance entered Running
    pub started_at: Option<DateTime<Utc>>,

    /// When the instance reached a terminal outcome
    pub finished_at: Option<DateTime<Utc>>,

    /// Why the instance was skipped, cancelled or failed
    pub reason: Option<String>,
}

impl InstanceState {
    pub fn new() -> Self {
        Self {
            outcome: Outcome::Pending,
            started_at: None,
            finished_at: None,
            reason: None,
        }
    }

    /// Apply a lifecycle transition, stamping the time it happened.
    pub fn transition(
        &mut self,
        instance: &str,
        next: Outcome,
        reason: Option<String>,
    ) -> Result<(), TransitionError> {
        if !self.outcome.can_transition_to(next) {
            return Err(TransitionError {
                instance: instance.to_string(),
                from: self.outcome,
                to: next,
            });
        }

        let now = Utc::now();
        if next == Outcome::Running {
            self.started_at = Some(now);
        } else {
            self.finished_at = Some(now);
        }
        self.outcome = next;
        if reason.is_some() {
            self.reason = reason;
        }
        Ok(())
    }
}

impl Default for InstanceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall pipeline verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
    Cancelled,
}

impl Verdict {
    /// Process exit code for this verdict
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Success => 0,
            Verdict::Failure | Verdict::Cancelled => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::Failure => "failure",
            Verdict::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Verdict::Success),
            "failure" => Ok(Verdict::Failure),
            "cancelled" => Ok(Verdict::Cancelled),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}
