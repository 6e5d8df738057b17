//! Pipeline domain model

use crate::core::{
    cache_key::{self, CacheKeyChain, CacheKeyContext},
    config::PipelineConfig,
    context::TriggerContext,
    error::DefinitionError,
    graph::JobGraph,
    job::{JobDefinition, JobInstance},
    matrix::Expansion,
    state::Outcome,
};
use crate::execution::{aggregator::CriticalSet, post_run::PostRunAction};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// A pipeline run: trigger, definitions, DAG and expanded instances
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Immutable trigger context
    pub trigger: TriggerContext,

    /// Skip unsatisfiable work as soon as any instance fails
    pub fail_fast: bool,

    /// Concurrency bound from configuration
    pub max_parallel: Option<usize>,

    /// Jobs whose failure fails the pipeline
    pub critical: CriticalSet,

    /// Job instances, grouped by job in declaration order
    pub instances: Vec<JobInstance>,

    /// Jobs with no instances because a matrix axis was empty (id -> reason)
    pub collapsed: BTreeMap<String, String>,

    /// Action invoked once after the DAG completes
    pub post_run: Option<PostRunAction>,

    definitions: Vec<JobDefinition>,
    definition_index: HashMap<String, usize>,
    graph: JobGraph,

    /// Precomputed `${{ hashFiles }}` values per job
    manifest_hashes: HashMap<String, String>,
}

impl Pipeline {
    /// Build a pipeline from validated definitions.
    ///
    /// Fails with a [`DefinitionError`] before any instance exists.
    pub fn new(
        name: impl Into<String>,
        definitions: Vec<JobDefinition>,
        trigger: TriggerContext,
    ) -> Result<Self, DefinitionError> {
        let graph = JobGraph::build(&definitions)?;

        let mut instances = Vec::new();
        let mut collapsed = BTreeMap::new();
        for def in &definitions {
            match def.matrix.expand() {
                Expansion::Instances(coordinates) => {
                    for (index, coordinate) in coordinates.into_iter().enumerate() {
                        instances.push(JobInstance::new(def.id.clone(), coordinate, index));
                    }
                }
                Expansion::Collapsed { reason } => {
                    debug!("Job {} collapsed: {}", def.id, reason);
                    collapsed.insert(def.id.clone(), reason);
                }
            }
        }

        let critical = CriticalSet::from_definitions(&definitions);
        let definition_index = definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();

        Ok(Pipeline {
            name: name.into(),
            trigger,
            fail_fast: false,
            max_parallel: None,
            critical,
            instances,
            collapsed,
            post_run: None,
            definitions,
            definition_index,
            graph,
            manifest_hashes: HashMap::new(),
        })
    }

    /// Create a pipeline from configuration
    pub fn from_config(
        config: &PipelineConfig,
        trigger: TriggerContext,
    ) -> Result<Self, DefinitionError> {
        let definitions = config
            .jobs
            .iter()
            .map(JobDefinition::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        let mut pipeline = Self::new(config.name.clone(), definitions, trigger)?;
        pipeline.fail_fast = config.fail_fast;
        pipeline.max_parallel = config.max_parallel;

        if let Some(post_run) = &config.post_run {
            pipeline.post_run = Some(PostRunAction::from_config(post_run, &pipeline.graph)?);
        }

        Ok(pipeline)
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_critical(mut self, critical: CriticalSet) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_post_run(mut self, action: PostRunAction) -> Self {
        self.post_run = Some(action);
        self
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn definitions(&self) -> &[JobDefinition] {
        &self.definitions
    }

    /// Get a job definition by ID
    pub fn definition(&self, id: &str) -> Option<&JobDefinition> {
        self.definition_index.get(id).map(|&i| &self.definitions[i])
    }

    /// Instances of one job, in matrix order
    pub fn instances_of<'a>(&'a self, job_id: &'a str) -> impl Iterator<Item = &'a JobInstance> {
        self.instances.iter().filter(move |i| i.job_id == job_id)
    }

    /// Find an instance by its display name
    pub fn instance(&self, name: &str) -> Option<&JobInstance> {
        self.instances.iter().find(|i| i.name() == name)
    }

    /// Outcomes of every instance of the given jobs.
    ///
    /// A collapsed job contributes a single Skipped outcome.
    pub fn outcomes_of(&self, jobs: &[String]) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        for job in jobs {
            if self.collapsed.contains_key(job) {
                outcomes.push(Outcome::Skipped);
            } else {
                outcomes.extend(self.instances_of(job).map(|i| i.state.outcome));
            }
        }
        outcomes
    }

    /// Outcomes of every dependency instance of instance `idx`
    pub fn dependency_outcomes(&self, idx: usize) -> Vec<Outcome> {
        let job = &self.instances[idx].job_id;
        self.outcomes_of(self.graph.dependencies(job))
    }

    /// Stable dispatch key: topological rank, declaration order, matrix index
    pub fn dispatch_key(&self, idx: usize) -> (usize, usize, usize) {
        let inst = &self.instances[idx];
        (
            self.graph.rank(&inst.job_id),
            self.graph.position(&inst.job_id),
            inst.index,
        )
    }

    /// Check if every instance is terminal
    pub fn is_complete(&self) -> bool {
        self.instances.iter().all(|i| i.state.outcome.is_terminal())
    }

    /// Check if any instance has failed
    pub fn has_failure(&self) -> bool {
        self.instances
            .iter()
            .any(|i| i.state.outcome == Outcome::Failure)
    }

    /// Hash each caching job's manifests relative to `root`.
    ///
    /// Done once up front so key resolution stays free of I/O.
    pub fn compute_manifest_hashes(&mut self, root: &Path) {
        for def in &self.definitions {
            let Some(cache) = &def.cache else { continue };
            if cache.hash_files.is_empty() {
                continue;
            }
            for path in cache.hash_files.iter().filter(|p| !root.join(p).exists()) {
                warn!("Job {}: manifest {} not found", def.id, path);
            }
            self.manifest_hashes
                .insert(def.id.clone(), cache_key::hash_files(root, &cache.hash_files));
        }
    }

    /// Set the manifest hash of a job directly
    pub fn set_manifest_hash(&mut self, job_id: &str, hash: impl Into<String>) {
        self.manifest_hashes.insert(job_id.to_string(), hash.into());
    }

    /// Resolve the cache key chain of instance `idx`, if its job caches
    pub fn cache_chain(&self, idx: usize) -> Option<CacheKeyChain> {
        let inst = &self.instances[idx];
        let spec = self.definition(&inst.job_id)?.cache.as_ref()?;

        let mut ctx = CacheKeyContext::for_instance(&inst.job_id, &inst.coordinate, &self.trigger);
        if let Some(hash) = self.manifest_hashes.get(&inst.job_id) {
            ctx.insert(cache_key::HASH_FILES, hash);
        }
        Some(cache_key::resolve(spec, &ctx))
    }
}
