//! Cache key resolution
//!
//! Templates use `${{ name }}` placeholders. Resolution is pure: manifest
//! hashes are computed by the caller (see [`hash_files`]) and passed in
//! through the [`CacheKeyContext`].

use crate::core::{
    config::CacheConfig, context::TriggerContext, error::DefinitionError, job::Coordinate,
};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Name of the placeholder carrying the manifest hash
pub const HASH_FILES: &str = "hashFiles";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Cache declaration of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheKeySpec {
    /// Primary key template
    pub key: String,

    /// Fallback templates, in probe order
    pub restore_keys: Vec<String>,

    /// Files saved and restored under the key
    pub paths: Vec<String>,

    /// Manifests hashed into `${{ hashFiles }}`
    pub hash_files: Vec<String>,
}

impl CacheKeySpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            restore_keys: Vec::new(),
            paths: Vec::new(),
            hash_files: Vec::new(),
        }
    }

    pub fn with_restore_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restore_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Validate a job's cache configuration
    pub fn from_config(job: &str, config: &CacheConfig) -> Result<Self, DefinitionError> {
        let malformed = |message: String| DefinitionError::MalformedCache {
            job: job.to_string(),
            message,
        };

        if config.key.trim().is_empty() {
            return Err(malformed("cache key must not be empty".to_string()));
        }

        for template in std::iter::once(&config.key).chain(&config.restore_keys) {
            let opened = template.matches("${{").count();
            let parsed = placeholder().find_iter(template).count();
            if opened != parsed {
                return Err(malformed(format!("malformed placeholder in '{}'", template)));
            }
        }

        Ok(Self {
            key: config.key.clone(),
            restore_keys: config.restore_keys.clone(),
            paths: config.paths.clone(),
            hash_files: config.hash_files.clone(),
        })
    }
}

/// Values available to cache key templates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheKeyContext {
    values: BTreeMap<String, String>,
}

impl CacheKeyContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for one instance: job id, matrix values, runner and trigger
    pub fn for_instance(job_id: &str, coordinate: &Coordinate, trigger: &TriggerContext) -> Self {
        let mut ctx = Self::new();
        ctx.insert("job", job_id);
        ctx.insert("runner.os", std::env::consts::OS);
        ctx.insert("runner.arch", std::env::consts::ARCH);
        ctx.insert("event", &trigger.event);
        ctx.insert("branch", &trigger.branch);
        for (axis, value) in coordinate.iter() {
            ctx.insert(&format!("matrix.{}", axis), value);
        }
        ctx
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Ordered candidate keys, primary first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheKeyChain {
    pub keys: Vec<String>,

    /// Placeholders that had no value and were replaced by ""
    pub unresolved: Vec<String>,
}

impl CacheKeyChain {
    pub fn primary(&self) -> &str {
        &self.keys[0]
    }

    pub fn fallbacks(&self) -> &[String] {
        &self.keys[1..]
    }
}

/// Interpolate every template of `spec`.
///
/// The chain is never empty; duplicate fallbacks are dropped.
pub fn resolve(spec: &CacheKeySpec, context: &CacheKeyContext) -> CacheKeyChain {
    let mut unresolved = Vec::new();
    let mut keys: Vec<String> = Vec::with_capacity(1 + spec.restore_keys.len());

    for template in std::iter::once(&spec.key).chain(&spec.restore_keys) {
        let key = interpolate(template, context, &mut unresolved);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    unresolved.sort();
    unresolved.dedup();
    CacheKeyChain { keys, unresolved }
}

fn interpolate(template: &str, context: &CacheKeyContext, unresolved: &mut Vec<String>) -> String {
    placeholder()
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match context.get(name) {
                Some(value) => value.to_string(),
                None => {
                    unresolved.push(name.to_string());
                    String::new()
                }
            }
        })
        .into_owned()
}

/// SHA-256 over the manifests `paths` (relative to `root`), in order, as
/// lowercase hex.
///
/// Each file is framed by its relative path and length so neither content
/// can bleed into the next. A missing file hashes as its path plus an
/// absence marker, so a fresh checkout still yields a key.
pub fn hash_files<P: AsRef<Path>>(root: &Path, paths: &[P]) -> String {
    let mut hasher = Sha256::new();
    for path in paths {
        let name = path.as_ref().to_string_lossy();
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());

        match std::fs::read(root.join(path.as_ref())) {
            Ok(contents) => {
                hasher.update([1u8]);
                hasher.update((contents.len() as u64).to_le_bytes());
                hasher.update(&contents);
            }
            Err(_) => hasher.update([0u8]),
        }
    }
    hex::encode(hasher.finalize())
}
