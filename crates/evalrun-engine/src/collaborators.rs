//! Interfaces to the collaborators the runner drives.
//!
//! Scenario loading, adaptation, execution, augmentation and tokenization
//! live behind these traits. The runner only relies on the contracts below;
//! [`crate::local`] provides small offline implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use evalrun_core::{
    AdapterSpec, CacheError, DataAugmenterSpec, FsEvalCache, Instance, ScenarioSpec,
    ScenarioState,
};
use serde::{Deserialize, Serialize};

/// Descriptive metadata persisted as `scenario.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioMetadata {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Where the scenario stores downloaded or derived data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

/// A source of evaluation instances.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn metadata(&self) -> ScenarioMetadata;

    /// Load every instance. May be expensive; implementations cache under
    /// `output_path`.
    async fn get_instances(&self, output_path: &Path) -> anyhow::Result<Vec<Instance>>;
}

/// Builds scenarios from specs.
pub trait ScenarioFactory: Send + Sync {
    fn create(&self, spec: &ScenarioSpec) -> anyhow::Result<Box<dyn Scenario>>;
}

/// Turns instances into requests.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Select the instances this run evaluates (e.g. cap the eval split).
    fn get_run_instances(&self, instances: Vec<Instance>) -> Vec<Instance>;

    /// Build one request state per (trial, instance). Requests are not executed.
    async fn adapt(&self, instances: &[Instance], parallelism: usize)
        -> anyhow::Result<ScenarioState>;
}

/// Builds adapters from specs.
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        spec: &AdapterSpec,
        tokenizer: Arc<dyn TokenizerService>,
    ) -> anyhow::Result<Box<dyn Adapter>>;
}

/// Sends requests to the model backend and fills in results.
///
/// Retry and backoff belong to the implementation; an error returned here is
/// final for the run.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, scenario_state: ScenarioState) -> anyhow::Result<ScenarioState>;
}

/// Applies data augmentation before adaptation.
#[async_trait]
pub trait DataPreprocessor: Send + Sync {
    async fn preprocess(
        &self,
        instances: Vec<Instance>,
        spec: &DataAugmenterSpec,
        parallelism: usize,
    ) -> anyhow::Result<Vec<Instance>>;
}

/// Preprocessor that returns instances unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPreprocessor;

#[async_trait]
impl DataPreprocessor for IdentityPreprocessor {
    async fn preprocess(
        &self,
        instances: Vec<Instance>,
        spec: &DataAugmenterSpec,
        _parallelism: usize,
    ) -> anyhow::Result<Vec<Instance>> {
        if !spec.is_noop() {
            anyhow::bail!(
                "data augmentation with {} perturbation(s) requested but no augmenter is configured",
                spec.perturbation_specs.len()
            );
        }
        Ok(instances)
    }
}

/// Splits text into tokens for a given model.
#[async_trait]
pub trait TokenizerService: Send + Sync {
    async fn tokenize(&self, model: &str, text: &str) -> anyhow::Result<Vec<String>>;
}

/// Tokenizer that splits on whitespace, regardless of model.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

#[async_trait]
impl TokenizerService for WhitespaceTokenizer {
    async fn tokenize(&self, _model: &str, text: &str) -> anyhow::Result<Vec<String>> {
        Ok(text.split_whitespace().map(str::to_string).collect())
    }
}

/// Capabilities handed to metrics for auxiliary, cache-scoped computation.
pub trait MetricService: Send + Sync {
    /// The eval cache rooted at `eval_cache_path`.
    ///
    /// Every call with the same path returns the same cache so per-key writer
    /// serialization holds across metrics.
    fn eval_cache(&self, eval_cache_path: &Path) -> Result<Arc<FsEvalCache>, CacheError>;
}

/// [`MetricService`] backed by on-disk eval caches.
#[derive(Default)]
pub struct LocalMetricService {
    caches: Mutex<HashMap<PathBuf, Arc<FsEvalCache>>>,
}

impl LocalMetricService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricService for LocalMetricService {
    fn eval_cache(&self, eval_cache_path: &Path) -> Result<Arc<FsEvalCache>, CacheError> {
        let mut caches = self.caches.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cache) = caches.get(eval_cache_path) {
            return Ok(Arc::clone(cache));
        }
        let cache = Arc::new(FsEvalCache::new(eval_cache_path)?);
        caches.insert(eval_cache_path.to_path_buf(), Arc::clone(&cache));
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalrun_core::ObjectSpec;

    #[tokio::test]
    async fn whitespace_tokenizer_splits() {
        let tokens = WhitespaceTokenizer
            .tokenize("any", "  the quick\nbrown  ")
            .await
            .expect("tokenize");
        assert_eq!(tokens, vec!["the", "quick", "brown"]);
    }

    #[tokio::test]
    async fn identity_preprocessor_passes_through() {
        let instances = vec![Instance::new("q", vec![])];
        let out = IdentityPreprocessor
            .preprocess(instances.clone(), &DataAugmenterSpec::default(), 4)
            .await
            .expect("preprocess");
        assert_eq!(out, instances);
    }

    #[tokio::test]
    async fn identity_preprocessor_rejects_perturbations() {
        let spec = DataAugmenterSpec {
            perturbation_specs: vec![ObjectSpec::new("typos")],
            should_augment_eval_instances: true,
            ..DataAugmenterSpec::default()
        };
        let result = IdentityPreprocessor.preprocess(vec![], &spec, 1).await;
        assert!(result.is_err());
    }

    #[test]
    fn metric_service_reuses_cache_per_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = LocalMetricService::new();
        let a = service.eval_cache(dir.path()).expect("cache");
        let b = service.eval_cache(dir.path()).expect("cache");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
