//! Job domain model

use crate::core::{
    cache_key::CacheKeySpec,
    condition::Condition,
    config::JobConfig,
    error::DefinitionError,
    matrix::MatrixSpec,
    state::InstanceState,
};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_yaml::Value;
use std::fmt;

/// One chosen value per matrix axis, in axis declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Coordinate {
    values: Vec<(String, String)>,
}

impl Coordinate {
    pub fn from_pairs(values: Vec<(String, String)>) -> Self {
        Self { values }
    }

    /// Value chosen for an axis
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(a, _)| a == axis)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(a, v)| (a.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(a, v)| format!("{}={}", a, v))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (axis, value) in &self.values {
            map.serialize_entry(axis, value)?;
        }
        map.end()
    }
}

/// A validated, immutable job definition
#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// Unique job identifier
    pub id: String,

    /// Job ids this job depends on
    pub dependencies: Vec<String>,

    /// Parsed condition
    pub condition: Condition,

    /// Matrix axes and exclusions
    pub matrix: MatrixSpec,

    /// Cache key templates, if the job caches anything
    pub cache: Option<CacheKeySpec>,

    /// Whether a failure of this job fails the pipeline
    pub critical: bool,

    /// Per-instance timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Opaque step sequence
    pub steps: Value,
}

impl JobDefinition {
    /// Create a job with no dependencies, default condition and no matrix
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            condition: Condition::Success,
            matrix: MatrixSpec::default(),
            cache: None,
            critical: true,
            timeout_secs: None,
            steps: Value::Null,
        }
    }

    /// Create a job definition from its configuration
    pub fn from_config(config: &JobConfig) -> Result<Self, DefinitionError> {
        let condition = match &config.condition {
            Some(source) => {
                Condition::parse(source).map_err(|message| DefinitionError::MalformedCondition {
                    job: config.id.clone(),
                    message,
                })?
            }
            None => Condition::Success,
        };

        let matrix = MatrixSpec::from_mapping(&config.matrix).map_err(|message| {
            DefinitionError::MalformedMatrix {
                job: config.id.clone(),
                message,
            }
        })?;

        let cache = config
            .cache
            .as_ref()
            .map(|c| CacheKeySpec::from_config(&config.id, c))
            .transpose()?;

        Ok(Self {
            id: config.id.clone(),
            dependencies: config.depends_on.clone(),
            condition,
            matrix,
            cache,
            critical: config.critical.unwrap_or(true),
            timeout_secs: config.timeout_secs,
            steps: config.steps.clone(),
        })
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_matrix(mut self, matrix: MatrixSpec) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_cache(mut self, cache: CacheKeySpec) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_steps(mut self, steps: Value) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }
}

/// A concrete job instance produced by matrix expansion
#[derive(Debug, Clone)]
pub struct JobInstance {
    /// Job this instance belongs to
    pub job_id: String,

    /// Matrix coordinate (empty without a matrix)
    pub coordinate: Coordinate,

    /// Position within the job's expansion
    pub index: usize,

    /// Runtime state
    pub state: InstanceState,
}

impl JobInstance {
    pub fn new(job_id: impl Into<String>, coordinate: Coordinate, index: usize) -> Self {
        Self {
            job_id: job_id.into(),
            coordinate,
            index,
            state: InstanceState::new(),
        }
    }

    /// Display name, e.g. `test (os=linux, py=3.11)`
    pub fn name(&self) -> String {
        if self.coordinate.is_empty() {
            self.job_id.clone()
        } else {
            format!("{} ({})", self.job_id, self.coordinate)
        }
    }
}
