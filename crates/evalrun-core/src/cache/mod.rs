//! Evaluation cache and cache-hit accounting.
//!
//! [`fs::FsEvalCache`] stores expensive metric-side computations (human
//! evaluation lookups, model-graded judgements, …) under the run suite's
//! `eval_cache` directory. [`CACHE_STATS`] collects hit/miss counts from every
//! cache in the process so the runner can report them after each run.

pub mod fs;

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

/// Errors from eval cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Process-wide cache hit/miss registry.
pub static CACHE_STATS: CacheStats = CacheStats::new();

/// Hit and miss counts for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub hits: u64,
    pub misses: u64,
}

/// Hit/miss counts keyed by cache label (usually its path).
pub struct CacheStats {
    counts: Mutex<BTreeMap<String, CacheCounts>>,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    pub const fn new() -> Self {
        Self {
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn record_hit(&self, cache: &str) {
        self.with_entry(cache, |c| c.hits += 1);
    }

    pub fn record_miss(&self, cache: &str) {
        self.with_entry(cache, |c| c.misses += 1);
    }

    fn with_entry(&self, cache: &str, f: impl FnOnce(&mut CacheCounts)) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        f(counts.entry(cache.to_string()).or_default());
    }

    /// Current counts per cache, in label order.
    pub fn snapshot(&self) -> BTreeMap<String, CacheCounts> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Emit one `info!` line per cache with its hit/miss counts.
    pub fn print_status(&self) {
        for (cache, counts) in self.snapshot() {
            tracing::info!(
                event = "cache.status",
                cache = %cache,
                hits = counts.hits,
                misses = counts.misses,
            );
        }
    }

    /// Forget every count (useful in tests).
    pub fn reset(&self) {
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
