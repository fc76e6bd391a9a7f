//! evalrun engine
//!
//! Metric evaluation, duplicate-stat detection, run orchestration and
//! artifact persistence. Scenario loading, adaptation and execution are
//! reached through the traits in [`collaborators`]; [`local`] holds offline
//! implementations of them.

pub mod collaborators;
pub mod error;
pub mod local;
pub mod metric;
pub mod persist;
pub mod pipeline;
pub mod run_specs;
pub mod runner;

pub use collaborators::{
    Adapter, AdapterFactory, DataPreprocessor, Executor, IdentityPreprocessor,
    LocalMetricService, MetricService, Scenario, ScenarioFactory, ScenarioMetadata,
    TokenizerService, WhitespaceTokenizer,
};
pub use error::{RunError, RunErrorKind, RunPhase};
pub use local::{FileScenario, FileScenarioFactory, PromptAdapter, PromptAdapterFactory, RecordedExecutor};
pub use metric::{create_metric, BasicMetric, BiasCounts, BiasMetric, Metric, MetricContext, TokensMetric};
pub use persist::{write_run_artifacts, RunArtifacts};
pub use pipeline::{evaluate_metrics, find_duplicate_stats, EvaluatedStats};
pub use run_specs::{construct_run_specs, parse_object_spec, run_specs_from_description, RunSpecError};
pub use runner::{Collaborators, ExecutionSpec, RunAllReport, RunOutcome, Runner, RunnerConfig};
