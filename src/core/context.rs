//! Trigger context - the immutable event that started a pipeline run

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What triggered this run.
///
/// Passed by reference to the condition evaluator and the cache key
/// resolver; nothing reads trigger data from ambient state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Event kind, e.g. "push" or "pull_request"
    pub event: String,

    /// Branch name the run is for
    pub branch: String,

    /// Whether the run belongs to a pull request
    pub is_pull_request: bool,

    /// Arbitrary key/value metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TriggerContext {
    pub fn new(event: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            branch: branch.into(),
            ..Self::default()
        }
    }

    pub fn with_pull_request(mut self, is_pull_request: bool) -> Self {
        self.is_pull_request = is_pull_request;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a context from `JOBFLOW_*` environment variables.
    ///
    /// Missing variables fall back to event "manual" on an empty branch.
    pub fn from_env() -> Self {
        let event = std::env::var("JOBFLOW_EVENT").unwrap_or_else(|_| "manual".to_string());
        let branch = std::env::var("JOBFLOW_BRANCH").unwrap_or_default();
        let is_pull_request = std::env::var("JOBFLOW_PULL_REQUEST")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            event,
            branch,
            is_pull_request,
            metadata: BTreeMap::new(),
        }
    }

    /// Look up a field by the name conditions use for it.
    ///
    /// Returns `None` when the field is not present, which callers treat
    /// as a fail-closed condition.
    pub fn field(&self, name: &str) -> Option<ContextValue<'_>> {
        match name {
            "event" => Some(ContextValue::Str(&self.event)),
            "branch" => Some(ContextValue::Str(&self.branch)),
            "is_pull_request" => Some(ContextValue::Bool(self.is_pull_request)),
            _ => name
                .strip_prefix("metadata.")
                .and_then(|key| self.metadata.get(key))
                .map(|v| ContextValue::Str(v.as_str())),
        }
    }
}

/// A borrowed context value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextValue<'a> {
    Str(&'a str),
    Bool(bool),
}

impl ContextValue<'_> {
    /// Truthiness used when a field appears on its own in a condition
    pub fn is_truthy(&self) -> bool {
        match self {
            ContextValue::Bool(b) => *b,
            ContextValue::Str(s) => *s == "true",
        }
    }

    /// Compare against a string literal from a condition
    pub fn equals(&self, literal: &str) -> bool {
        match self {
            ContextValue::Str(s) => *s == literal,
            ContextValue::Bool(b) => literal == if *b { "true" } else { "false" },
        }
    }
}
