use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::{CacheError, Result, CACHE_STATS};

/// Filesystem-backed JSON cache with git-style 2-char sharding.
///
/// Layout: `<root>/<first 2 hex chars of sha256(key)>/<remaining hex chars>.json`
///
/// Reads never block. Writers to the same key are serialized so an expensive
/// computation runs at most once per key at a time. A key's writer lock lives
/// only while some caller holds a lease on it.
pub struct FsEvalCache {
    root: PathBuf,
    label: String,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Shared claim on a key's writer lock; the last lease out removes the entry.
struct WriterLease<'c> {
    cache: &'c FsEvalCache,
    key: &'c str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for WriterLease<'_> {
    fn drop(&mut self) {
        let mut writers = self.cache.writers.lock().unwrap_or_else(|e| e.into_inner());
        let last = writers
            .get(self.key)
            // The map and this lease hold the only references.
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
        if last {
            writers.remove(self.key);
        }
    }
}

impl FsEvalCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            label: root.display().to_string(),
            root,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let hex = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join(&hex[..2]).join(format!("{}.json", &hex[2..]))
    }

    fn lease<'c>(&'c self, key: &'c str) -> WriterLease<'c> {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        let lock = writers.entry(key.to_string()).or_default().clone();
        WriterLease {
            cache: self,
            key,
            lock,
        }
    }

    /// Number of keys with a live writer lock.
    pub fn pending_writers(&self) -> usize {
        self.writers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Read a cached value, `None` if absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Write a value, replacing any previous one atomically.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.entry_path(key);
        let bytes = serde_json::to_vec(value)?;
        let shard_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&shard_dir)?;

        let mut tmp = NamedTempFile::new_in(&shard_dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Concurrent callers for the same key wait for the first writer and then
    /// read its result instead of recomputing.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, compute: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(value) = self.get(key)? {
            CACHE_STATS.record_hit(&self.label);
            return Ok(value);
        }

        // Declared first so the guard is released before the lease drops.
        let lease = self.lease(key);
        let _guard = lease.lock.lock().await;

        if let Some(value) = self.get(key)? {
            CACHE_STATS.record_hit(&self.label);
            return Ok(value);
        }

        CACHE_STATS.record_miss(&self.label);
        let value = compute().await?;
        self.put(key, &value)?;
        Ok(value)
    }
}
