//! Run orchestration.
//!
//! A [`Runner`] takes run specs one at a time through scenario loading,
//! adaptation, execution and metric evaluation, then persists the results
//! under `<output>/runs/<suite>/<run name>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use evalrun_core::{
    emit_run_failed, emit_run_finished, emit_run_phase, emit_run_started, run_span,
    with_instance_ids, Instance, MetricName, RunSpec, CACHE_STATS, COUNTERS, EVAL_CACHE_DIR,
};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};

use crate::collaborators::{
    AdapterFactory, DataPreprocessor, Executor, IdentityPreprocessor, LocalMetricService,
    MetricService, ScenarioFactory, TokenizerService, WhitespaceTokenizer,
};
use crate::error::{RunError, RunErrorKind, RunPhase};
use crate::metric::{create_metric, Metric, MetricContext, TokensMetric};
use crate::persist::{write_run_artifacts, RunArtifacts};
use crate::pipeline::{evaluate_metrics, warn_duplicate_stats};

/// How requests and metrics are executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSpec {
    /// Upper bound on concurrent per-instance work.
    pub parallelism: usize,

    /// Only estimate token usage; configured metrics are skipped.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for ExecutionSpec {
    fn default() -> Self {
        Self {
            parallelism: 4,
            dry_run: false,
        }
    }
}

/// Runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    /// Root output directory.
    pub output_path: PathBuf,

    /// Suite name; runs are written under `<output>/runs/<suite>`.
    pub suite: String,

    /// Evaluate on an empty instance list and write nothing.
    #[serde(default)]
    pub skip_instances: bool,

    #[serde(default)]
    pub execution: ExecutionSpec,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("benchmark_output"),
            suite: "latest".to_string(),
            skip_instances: false,
            execution: ExecutionSpec::default(),
        }
    }
}

/// The services a runner drives.
#[derive(Clone)]
pub struct Collaborators {
    pub scenario_factory: Arc<dyn ScenarioFactory>,
    pub adapter_factory: Arc<dyn AdapterFactory>,
    pub executor: Arc<dyn Executor>,
    pub preprocessor: Arc<dyn DataPreprocessor>,
    pub metric_service: Arc<dyn MetricService>,
    pub tokenizer: Arc<dyn TokenizerService>,
}

impl Collaborators {
    /// Scenario, adapter and executor are required; the rest default to the
    /// identity preprocessor, an on-disk metric service and a whitespace
    /// tokenizer.
    pub fn new(
        scenario_factory: Arc<dyn ScenarioFactory>,
        adapter_factory: Arc<dyn AdapterFactory>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            scenario_factory,
            adapter_factory,
            executor,
            preprocessor: Arc::new(IdentityPreprocessor),
            metric_service: Arc::new(LocalMetricService::new()),
            tokenizer: Arc::new(WhitespaceTokenizer),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn DataPreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn TokenizerService>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_metric_service(mut self, metric_service: Arc<dyn MetricService>) -> Self {
        self.metric_service = metric_service;
        self
    }
}

/// Summary of a successful (or skipped) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_name: String,

    /// `Persisted` normally, `Skipped` in skip-instances mode.
    pub phase: RunPhase,

    pub num_stats: usize,

    /// Stat identities produced more than once; all copies were persisted.
    pub duplicate_stats: Vec<MetricName>,

    /// Run directory; `None` when nothing was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_path: Option<PathBuf>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of [`Runner::run_all`].
#[derive(Debug, Default)]
pub struct RunAllReport {
    pub outcomes: Vec<RunOutcome>,
    pub failures: Vec<RunError>,
}

impl RunAllReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.phase == RunPhase::Persisted)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.phase == RunPhase::Skipped)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Main entry point for running a batch of run specs.
pub struct Runner {
    config: RunnerConfig,
    collaborators: Collaborators,
    scenarios_path: PathBuf,
    runs_path: PathBuf,
    eval_cache_path: PathBuf,
}

impl Runner {
    /// Create the runner and its output directories.
    pub fn new(config: RunnerConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        let scenarios_path = config.output_path.join("scenarios");
        let runs_path = config.output_path.join("runs").join(&config.suite);
        let eval_cache_path = runs_path.join(EVAL_CACHE_DIR);

        std::fs::create_dir_all(&scenarios_path)?;
        std::fs::create_dir_all(&eval_cache_path)?;

        Ok(Self {
            config,
            collaborators,
            scenarios_path,
            runs_path,
            eval_cache_path,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn scenarios_path(&self) -> &Path {
        &self.scenarios_path
    }

    pub fn runs_path(&self) -> &Path {
        &self.runs_path
    }

    pub fn eval_cache_path(&self) -> &Path {
        &self.eval_cache_path
    }

    /// Run every spec in order.
    ///
    /// A failed run is logged and recorded in the report; the remaining runs
    /// still execute and earlier run directories are left in place.
    pub async fn run_all(&self, run_specs: &[RunSpec]) -> RunAllReport {
        let mut report = RunAllReport::default();

        for (index, run_spec) in run_specs.iter().enumerate() {
            info!(
                run = %run_spec.name(),
                progress = %format!("{}/{}", index + 1, run_specs.len()),
                "Running {}",
                run_spec.name()
            );
            match self.run_one(run_spec).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => report.failures.push(err),
            }
        }

        COUNTERS.flush();
        info!(
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "run batch complete"
        );
        report
    }

    /// Execute a single run.
    pub async fn run_one(&self, run_spec: &RunSpec) -> Result<RunOutcome, RunError> {
        let result = self
            .execute(run_spec)
            .instrument(run_span(run_spec.name()))
            .await;

        match &result {
            Ok(outcome) if outcome.phase == RunPhase::Skipped => COUNTERS.inc_runs_skipped(),
            Ok(_) => COUNTERS.inc_runs_completed(),
            Err(err) => {
                COUNTERS.inc_runs_failed();
                emit_run_failed(&err.run_name, err);
            }
        }
        result
    }

    async fn execute(&self, run_spec: &RunSpec) -> Result<RunOutcome, RunError> {
        let run_name = run_spec.name();
        let started_at = Utc::now();
        let start = Instant::now();
        let parallelism = self.config.execution.parallelism.max(1);
        let mut phase = RunPhase::Init;

        let fail = |phase: RunPhase, kind: RunErrorKind| RunError::new(run_name, phase, kind);

        emit_run_started(
            run_name,
            &self.config.suite,
            run_spec.metric_specs().len() + 1,
        );

        let scenario = self
            .collaborators
            .scenario_factory
            .create(run_spec.scenario_spec())
            .map_err(|e| fail(phase, RunErrorKind::Scenario(e)))?;
        let mut metadata = scenario.metadata();
        let scenario_output_path = self.scenarios_path.join(&metadata.name);
        std::fs::create_dir_all(&scenario_output_path)
            .map_err(|e| fail(phase, RunErrorKind::Scenario(e.into())))?;
        metadata.output_path = Some(scenario_output_path.clone());

        let adapter = self
            .collaborators
            .adapter_factory
            .create(run_spec.adapter_spec(), Arc::clone(&self.collaborators.tokenizer))
            .map_err(|e| fail(phase, RunErrorKind::Adapter(e)))?;

        let instances: Vec<Instance> = if self.config.skip_instances {
            Vec::new()
        } else {
            let instances = scenario
                .get_instances(&scenario_output_path)
                .await
                .map_err(|e| fail(phase, RunErrorKind::Scenario(e)))?;
            let instances = adapter.get_run_instances(with_instance_ids(instances));
            let instances = self
                .collaborators
                .preprocessor
                .preprocess(instances, run_spec.data_augmenter_spec(), parallelism)
                .await
                .map_err(|e| fail(phase, RunErrorKind::Preprocess(e)))?;
            phase = RunPhase::ScenarioLoaded;
            emit_run_phase(run_name, &phase);
            instances
        };

        let scenario_state = adapter
            .adapt(&instances, parallelism)
            .await
            .map_err(|e| fail(phase, RunErrorKind::Adapter(e)))?;
        phase = RunPhase::Adapted;
        emit_run_phase(run_name, &phase);

        let scenario_state = self
            .collaborators
            .executor
            .execute(scenario_state)
            .await
            .map_err(|e| fail(phase, RunErrorKind::UpstreamExecution(e)))?;
        phase = RunPhase::Executed;
        emit_run_phase(run_name, &phase);

        let metrics = self
            .build_metrics(run_spec)
            .map_err(|kind| fail(phase, kind))?;
        let evaluated = evaluate_metrics(
            run_name,
            &metrics,
            &scenario_state,
            self.collaborators.metric_service.as_ref(),
            &self.eval_cache_path,
            parallelism,
        )
        .await
        .map_err(|kind| fail(phase, kind))?;
        phase = RunPhase::MetricsEvaluated;
        emit_run_phase(run_name, &phase);

        let duplicate_stats = warn_duplicate_stats(run_name, &evaluated.stats);
        let num_stats = evaluated.stats.len();
        COUNTERS.add_stats_generated(num_stats as u64);
        info!("Generated {} stats.", num_stats);

        if self.config.skip_instances {
            info!("skip_instances was set, not writing results");
            emit_run_finished(run_name, start.elapsed().as_millis() as u64, num_stats, false);
            return Ok(RunOutcome {
                run_name: run_name.to_string(),
                phase: RunPhase::Skipped,
                num_stats,
                duplicate_stats,
                run_path: None,
                started_at,
                finished_at: Utc::now(),
            });
        }

        let run_path = write_run_artifacts(
            &self.runs_path,
            &RunArtifacts {
                run_spec,
                scenario: &metadata,
                scenario_state: &scenario_state,
                stats: &evaluated.stats,
                per_instance_stats: &evaluated.per_instance_stats,
            },
        )
        .map_err(|e| fail(phase, RunErrorKind::Persist(e)))?;
        phase = RunPhase::Persisted;
        emit_run_phase(run_name, &phase);

        CACHE_STATS.print_status();
        emit_run_finished(run_name, start.elapsed().as_millis() as u64, num_stats, true);

        Ok(RunOutcome {
            run_name: run_name.to_string(),
            phase,
            num_stats,
            duplicate_stats,
            run_path: Some(run_path),
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Configured metrics (none in dry-run mode) followed by token accounting.
    fn build_metrics(&self, run_spec: &RunSpec) -> Result<Vec<Box<dyn Metric>>, RunErrorKind> {
        let ctx = MetricContext {
            tokenizer: Arc::clone(&self.collaborators.tokenizer),
        };
        let mut metrics: Vec<Box<dyn Metric>> = Vec::new();
        if !self.config.execution.dry_run {
            for spec in run_spec.metric_specs() {
                let metric = create_metric(spec, &ctx).map_err(|source| RunErrorKind::Metric {
                    metric: spec.class_name.clone(),
                    source,
                })?;
                metrics.push(metric);
            }
        }
        metrics.push(Box::new(TokensMetric::new(ctx.tokenizer)));
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.output_path, PathBuf::from("benchmark_output"));
        assert_eq!(config.suite, "latest");
        assert!(!config.skip_instances);
        assert_eq!(config.execution.parallelism, 4);
        assert!(!config.execution.dry_run);
    }

    #[test]
    fn test_report_counts() {
        let outcome = |phase| RunOutcome {
            run_name: "r".to_string(),
            phase,
            num_stats: 0,
            duplicate_stats: vec![],
            run_path: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        let report = RunAllReport {
            outcomes: vec![outcome(RunPhase::Persisted), outcome(RunPhase::Skipped)],
            failures: vec![RunError::new(
                "bad",
                RunPhase::Init,
                RunErrorKind::Scenario(anyhow::anyhow!("missing")),
            )],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.has_failures());
    }
}
