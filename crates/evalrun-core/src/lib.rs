//! evalrun Core Library
//!
//! Domain types, statistics and shared infrastructure used by the evaluation
//! engine and the `evalrun` binary.

pub mod cache;
pub mod counters;
pub mod domain;
pub mod obs;
pub mod statistic;
pub mod telemetry;
pub mod unique;

pub use cache::fs::FsEvalCache;
pub use cache::{CacheCounts, CacheError, CacheStats, CACHE_STATS};

pub use domain::{
    with_instance_ids, AdapterSpec, Completion, DataAugmenterSpec, EvalError, Instance,
    InvalidRunName, MetricSpec, ObjectSpec, PerturbationSpec, Reference, Request, RequestIndex,
    RequestResult, RequestState, Result, RunSpec, RunSpecFields, ScenarioSpec, ScenarioState,
    Token, CORRECT_TAG, EVAL_CACHE_DIR,
};

pub use statistic::{MetricName, MetricResult, PerInstanceStats, Stat};
pub use unique::{find_unique, AmbiguityError};

pub use counters::COUNTERS;
pub use obs::{
    emit_duplicate_stat, emit_metric_evaluated, emit_run_failed, emit_run_finished,
    emit_run_phase, emit_run_started, run_span,
};
pub use telemetry::init_tracing;

/// evalrun version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
