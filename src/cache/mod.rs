//! Cache storage and key-chain restore

pub mod archive;

use crate::core::cache_key::CacheKeyChain;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Error types for cache storage
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Cache archive error: {0}")]
    Archive(String),
}

/// A stored cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub data: Vec<u8>,
    pub written_at: DateTime<Utc>,

    /// Monotonic write counter, breaks ties between equal timestamps
    pub sequence: u64,
}

/// Trait for cache storage backends
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Exact lookup
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `data` under `key`, replacing any previous entry
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<CacheEntry, CacheError>;

    /// Most recently written entry whose key starts with `prefix`
    async fn latest_with_prefix(&self, prefix: &str) -> Result<Option<CacheEntry>, CacheError>;
}

/// Outcome of probing a key chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredEntry {
    /// Chain key that produced the hit
    pub matched_key: String,

    /// Whether the hit was an exact match on the primary key
    pub exact: bool,

    pub entry: CacheEntry,
}

/// Probe `chain` against `store`.
///
/// The primary key must match exactly. Each fallback is tried as an exact
/// key and then as a prefix, taking the most recent entry.
pub async fn restore<S: CacheStore + ?Sized>(
    store: &S,
    chain: &CacheKeyChain,
) -> Result<Option<RestoredEntry>, CacheError> {
    if let Some(entry) = store.get(chain.primary()).await? {
        return Ok(Some(RestoredEntry {
            matched_key: chain.primary().to_string(),
            exact: true,
            entry,
        }));
    }

    for fallback in chain.fallbacks() {
        let hit = match store.get(fallback).await? {
            Some(entry) => Some(entry),
            None => store.latest_with_prefix(fallback).await?,
        };
        if let Some(entry) = hit {
            debug!("Cache fallback '{}' matched '{}'", fallback, entry.key);
            return Ok(Some(RestoredEntry {
                matched_key: fallback.clone(),
                exact: false,
                entry,
            }));
        }
    }

    Ok(None)
}

/// Process-local cache store
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    sequence: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry {
            key: key.to_string(),
            data,
            written_at: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), entry.clone());
        Ok(entry)
    }

    async fn latest_with_prefix(&self, prefix: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.key.starts_with(prefix))
            .max_by_key(|e| (e.written_at, e.sequence))
            .cloned())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    written_at: DateTime<Utc>,
    sequence: u64,
}

/// Cache store on the local filesystem.
///
/// Each entry is a `<sha256(key)>.bin` blob plus a `.meta.json` sidecar
/// holding the original key. Writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FilesystemCacheStore {
    root: PathBuf,
}

impl FilesystemCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location under the user's cache directory
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("jobflow")
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn stem(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.bin", Self::stem(key)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", Self::stem(key)))
    }

    async fn read_meta(path: &std::path::Path) -> Result<Option<EntryMeta>, CacheError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, meta: EntryMeta) -> Result<Option<CacheEntry>, CacheError> {
        match tokio::fs::read(self.blob_path(&meta.key)).await {
            Ok(data) => Ok(Some(CacheEntry {
                key: meta.key,
                data,
                written_at: meta.written_at,
                sequence: meta.sequence,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(path: &std::path::Path, bytes: &[u8]) -> Result<(), CacheError> {
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn next_sequence(&self) -> Result<u64, CacheError> {
        let mut highest = 0;
        for meta in self.all_meta().await? {
            highest = highest.max(meta.sequence + 1);
        }
        Ok(highest)
    }

    async fn all_meta(&self) -> Result<Vec<EntryMeta>, CacheError> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut metas = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".meta.json") {
                continue;
            }
            if let Some(meta) = Self::read_meta(&entry.path()).await? {
                metas.push(meta);
            }
        }
        Ok(metas)
    }
}

#[async_trait]
impl CacheStore for FilesystemCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        match Self::read_meta(&self.meta_path(key)).await? {
            Some(meta) if meta.key == key => self.load(meta).await,
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<CacheEntry, CacheError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let meta = EntryMeta {
            key: key.to_string(),
            written_at: Utc::now(),
            sequence: self.next_sequence().await?,
        };

        // Blob first so a visible sidecar always has its data
        Self::write_atomic(&self.blob_path(key), &data).await?;
        Self::write_atomic(&self.meta_path(key), &serde_json::to_vec(&meta)?).await?;
        debug!("Cached {} bytes under '{}'", data.len(), key);

        Ok(CacheEntry {
            key: meta.key,
            data,
            written_at: meta.written_at,
            sequence: meta.sequence,
        })
    }

    async fn latest_with_prefix(&self, prefix: &str) -> Result<Option<CacheEntry>, CacheError> {
        let latest = self
            .all_meta()
            .await?
            .into_iter()
            .filter(|m| m.key.starts_with(prefix))
            .max_by_key(|m| (m.written_at, m.sequence));

        match latest {
            Some(meta) => self.load(meta).await,
            None => Ok(None),
        }
    }
}
