use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::Graph;

/// A built graph together with the seed-set signature it was built for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub signature: String,
    pub built_at: DateTime<Utc>,
    pub graph: Graph,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Failed to persist cache record: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Cache lock poisoned")]
    Poisoned,
}

/// Deterministic cache key for a seed set: order and duplicates don't matter.
pub fn signature<S: AsRef<str>>(seeds: &[S]) -> String {
    let mut sorted: Vec<&str> = seeds.iter().map(|s| s.as_ref()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = Sha256::new();
    hasher.update(sorted.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

/// One cache slot per consumer context.
pub trait CacheStore: Send + Sync {
    fn load(&self, context: &str) -> Result<Option<CacheRecord>, CacheError>;
    fn store(&self, context: &str, record: &CacheRecord) -> Result<(), CacheError>;
    fn discard(&self, context: &str) -> Result<(), CacheError>;
}

/// JSON files under a directory, one per context, replaced atomically.
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    fn path_for(&self, context: &str) -> PathBuf {
        let name: String = context
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let name = if name.is_empty() { "default".to_string() } else { name };
        self.dir.join(format!("{}.json", name))
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self, context: &str) -> Result<Option<CacheRecord>, CacheError> {
        let path = self.path_for(context);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn store(&self, context: &str, record: &CacheRecord) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, record)?;
        tmp.flush()?;
        tmp.persist(self.path_for(context))?;
        Ok(())
    }

    fn discard(&self, context: &str) -> Result<(), CacheError> {
        match std::fs::remove_file(self.path_for(context)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store; records vanish with the process.
#[derive(Default)]
pub struct MemoryCacheStore {
    slots: Mutex<HashMap<String, CacheRecord>>,
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, context: &str) -> Result<Option<CacheRecord>, CacheError> {
        let slots = self.slots.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(slots.get(context).cloned())
    }

    fn store(&self, context: &str, record: &CacheRecord) -> Result<(), CacheError> {
        let mut slots = self.slots.lock().map_err(|_| CacheError::Poisoned)?;
        slots.insert(context.to_string(), record.clone());
        Ok(())
    }

    fn discard(&self, context: &str) -> Result<(), CacheError> {
        let mut slots = self.slots.lock().map_err(|_| CacheError::Poisoned)?;
        slots.remove(context);
        Ok(())
    }
}
