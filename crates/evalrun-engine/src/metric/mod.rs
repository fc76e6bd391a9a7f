//! Metric interface and registry.
//!
//! A metric reads a finished [`ScenarioState`] and returns a [`MetricResult`].
//! It never writes files and never mutates its input; persisting results is
//! the runner's job.

pub mod basic;
pub mod bias;
pub mod tokens;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use evalrun_core::{EvalError, MetricResult, MetricSpec, ScenarioState};

use crate::collaborators::{MetricService, TokenizerService};

pub use basic::BasicMetric;
pub use bias::{BiasCounts, BiasMetric};
pub use tokens::TokensMetric;

/// Computes statistics over an evaluated scenario state.
#[async_trait]
pub trait Metric: Send + Sync {
    /// Name used in logs and error context.
    fn name(&self) -> &str;

    /// Evaluate over `scenario_state`.
    ///
    /// `parallelism` bounds how many concurrent per-instance tasks the metric
    /// may run; metrics without parallel work ignore it.
    async fn evaluate(
        &self,
        scenario_state: &ScenarioState,
        metric_service: &dyn MetricService,
        eval_cache_path: &Path,
        parallelism: usize,
    ) -> evalrun_core::Result<MetricResult>;
}

/// Shared services available when constructing metrics.
#[derive(Clone)]
pub struct MetricContext {
    pub tokenizer: Arc<dyn TokenizerService>,
}

/// Instantiate the metric named by `spec.class_name`.
///
/// Short names (`bbq`, `basic`, `tokens`) and dotted class paths ending in
/// the metric type name are both accepted.
pub fn create_metric(spec: &MetricSpec, ctx: &MetricContext) -> evalrun_core::Result<Box<dyn Metric>> {
    let short = spec
        .class_name
        .rsplit('.')
        .next()
        .unwrap_or(spec.class_name.as_str());
    match short {
        "bbq" | "BBQMetric" | "BiasMetric" => Ok(Box::new(BiasMetric::from_spec(spec)?)),
        "basic" | "BasicMetric" => Ok(Box::new(BasicMetric::from_spec(spec)?)),
        "tokens" | "TokensMetric" => Ok(Box::new(TokensMetric::new(Arc::clone(&ctx.tokenizer)))),
        _ => Err(EvalError::UnknownMetric(spec.class_name.clone())),
    }
}
