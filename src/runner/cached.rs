//! Caching step runner - restores declared paths before a job and saves
//! them after it succeeds

use crate::cache::{self, archive, CacheStore};
use crate::runner::{StepContext, StepError, StepRunner, StepStatus};
use async_trait::async_trait;
use serde_yaml::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Wraps another runner with cache restore and save
pub struct CachingStepRunner<R, S: ?Sized> {
    inner: R,
    store: Arc<S>,
    root: PathBuf,
}

impl<R, S: CacheStore + ?Sized> CachingStepRunner<R, S> {
    /// `root` is the directory cache paths are relative to
    pub fn new(inner: R, store: Arc<S>, root: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            store,
            root: root.into(),
        }
    }

    async fn restore(&self, ctx: &StepContext) -> Result<Option<bool>, StepError> {
        let Some(binding) = &ctx.cache else {
            return Ok(None);
        };

        let hit = cache::restore(self.store.as_ref(), &binding.chain)
            .await
            .map_err(|e| StepError::Cache(e.to_string()))?;

        let Some(hit) = hit else {
            info!("[{}] cache miss for '{}'", ctx.instance, binding.chain.primary());
            return Ok(Some(false));
        };

        let root = self.root.clone();
        let data = hit.entry.data.clone();
        let count = tokio::task::spawn_blocking(move || archive::unpack(&root, &data))
            .await
            .map_err(|e| StepError::Cache(e.to_string()))?
            .map_err(|e| StepError::Cache(format!("entry '{}': {}", hit.entry.key, e)))?;

        info!(
            "[{}] restored {} file(s) from '{}'{}",
            ctx.instance,
            count,
            hit.entry.key,
            if hit.exact { "" } else { " (fallback)" }
        );
        Ok(Some(hit.exact))
    }

    async fn save(&self, ctx: &StepContext) -> Result<(), StepError> {
        let Some(binding) = &ctx.cache else {
            return Ok(());
        };

        let root = self.root.clone();
        let paths = binding.paths.clone();
        let data = tokio::task::spawn_blocking(move || archive::pack(&root, &paths))
            .await
            .map_err(|e| StepError::Cache(e.to_string()))?
            .map_err(|e| StepError::Cache(e.to_string()))?;
        let size = data.len();

        self.store
            .put(binding.chain.primary(), data)
            .await
            .map_err(|e| StepError::Cache(e.to_string()))?;
        info!(
            "[{}] saved {} byte(s) under '{}'",
            ctx.instance,
            size,
            binding.chain.primary()
        );
        Ok(())
    }
}

#[async_trait]
impl<R, S> StepRunner for CachingStepRunner<R, S>
where
    R: StepRunner,
    S: CacheStore + ?Sized,
{
    async fn run(&self, steps: &Value, ctx: &StepContext) -> Result<StepStatus, StepError> {
        if let Some(binding) = &ctx.cache {
            if !binding.chain.unresolved.is_empty() {
                warn!(
                    "[{}] cache key has unresolved placeholders: {}",
                    ctx.instance,
                    binding.chain.unresolved.join(", ")
                );
            }
        }

        // A broken cache degrades to a miss
        let restored = match self.restore(ctx).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("[{}] cache restore failed: {}", ctx.instance, e);
                Some(false)
            }
        };

        let mut ctx = ctx.clone();
        if let Some(exact) = restored {
            ctx.set_env("JOBFLOW_CACHE_HIT", exact.to_string());
        }

        let status = self.inner.run(steps, &ctx).await?;

        if status.is_success() && restored == Some(false) {
            if let Err(e) = self.save(&ctx).await {
                warn!("[{}] cache save failed: {}", ctx.instance, e);
            }
        }

        Ok(status)
    }
}
