//! Pipeline configuration from YAML

use crate::core::{Pipeline, TriggerContext};
use anyhow::{Context, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Skip unsatisfiable work as soon as any instance fails
    #[serde(default)]
    pub fail_fast: bool,

    /// Maximum number of simultaneously running instances
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Jobs keyed by id, in declaration order
    #[serde(default, deserialize_with = "deserialize_jobs")]
    pub jobs: Vec<JobConfig>,

    /// Action invoked once after every job has finished
    #[serde(default)]
    pub post_run: Option<PostRunConfig>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique job identifier, taken from the mapping key
    #[serde(default, skip_deserializing)]
    pub id: String,

    /// Job ids this job depends on
    #[serde(default, alias = "dependsOn", alias = "needs")]
    pub depends_on: Vec<String>,

    /// Condition expression (defaults to `success()`)
    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    /// Matrix axes plus an optional `exclude` list
    #[serde(default)]
    pub matrix: Mapping,

    /// Cache key templates
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Whether a failure of this job fails the pipeline
    #[serde(default)]
    pub critical: Option<bool>,

    /// Per-instance timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Step sequence handed to the step runner as-is
    #[serde(default)]
    pub steps: Value,
}

/// Cache configuration for a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Primary key template
    pub key: String,

    /// Fallback key templates, probed in order
    #[serde(default, alias = "restoreKeys")]
    pub restore_keys: Vec<String>,

    /// Files saved to and restored from the cache
    #[serde(default)]
    pub paths: Vec<String>,

    /// Manifests whose contents make up `${{ hashFiles }}`
    #[serde(default, alias = "hashFiles")]
    pub hash_files: Vec<String>,
}

/// Post-run action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRunConfig {
    pub name: String,

    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    /// Jobs whose outcomes gate the action (defaults to every job)
    #[serde(default)]
    pub needs: Option<Vec<String>>,

    #[serde(default)]
    pub steps: Value,
}

fn deserialize_jobs<'de, D>(deserializer: D) -> std::result::Result<Vec<JobConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = Mapping::deserialize(deserializer)?;

    mapping
        .into_iter()
        .map(|(key, value)| {
            let id = match key {
                Value::String(s) => s,
                other => {
                    return Err(D::Error::custom(format!(
                        "job ids must be strings, got {:?}",
                        other
                    )))
                }
            };
            let value = if value.is_null() {
                Value::Mapping(Mapping::new())
            } else {
                value
            };
            let mut job: JobConfig = serde_yaml::from_value(value)
                .map_err(|e| D::Error::custom(format!("job '{}': {}", id, e)))?;
            job.id = id;
            Ok(job)
        })
        .collect()
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration by building the definitions and the DAG
    pub fn validate(&self) -> Result<()> {
        Pipeline::from_config(self, TriggerContext::default())?;
        Ok(())
    }

    /// Convert config to a Pipeline domain model for the given trigger
    pub fn to_pipeline(&self, trigger: TriggerContext) -> Result<Pipeline> {
        Ok(Pipeline::from_config(self, trigger)?)
    }

    /// Get a job configuration by id
    pub fn job(&self, id: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.id == id)
    }
}
