//! Metric evaluation and aggregation for one run.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use evalrun_core::{
    emit_duplicate_stat, emit_metric_evaluated, MetricName, PerInstanceStats, ScenarioState, Stat,
};

use crate::collaborators::MetricService;
use crate::error::RunErrorKind;
use crate::metric::Metric;

/// Merged output of every metric of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluatedStats {
    /// Aggregated stats, in metric order then in each metric's own order.
    pub stats: Vec<Stat>,
    pub per_instance_stats: Vec<PerInstanceStats>,
}

/// Evaluate `metrics` in order and concatenate their results.
///
/// The first failing metric aborts the evaluation; nothing is returned for
/// the metrics that already succeeded.
pub async fn evaluate_metrics(
    run_name: &str,
    metrics: &[Box<dyn Metric>],
    scenario_state: &ScenarioState,
    metric_service: &dyn MetricService,
    eval_cache_path: &Path,
    parallelism: usize,
) -> Result<EvaluatedStats, RunErrorKind> {
    let mut evaluated = EvaluatedStats::default();

    for metric in metrics {
        let start = Instant::now();
        let result = metric
            .evaluate(scenario_state, metric_service, eval_cache_path, parallelism.max(1))
            .await
            .map_err(|source| RunErrorKind::Metric {
                metric: metric.name().to_string(),
                source,
            })?;

        let (stats, per_instance_stats) = result.into_parts();
        emit_metric_evaluated(
            run_name,
            metric.name(),
            stats.len(),
            start.elapsed().as_millis() as u64,
        );
        evaluated.stats.extend(stats);
        evaluated.per_instance_stats.extend(per_instance_stats);
    }

    Ok(evaluated)
}

/// Stat identities that occur more than once, with their counts.
///
/// Near misses (e.g. names differing only in case) are not detected.
pub fn find_duplicate_stats(stats: &[Stat]) -> Vec<(MetricName, usize)> {
    let mut counts: BTreeMap<&MetricName, usize> = BTreeMap::new();
    for stat in stats {
        *counts.entry(stat.name()).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, count)| (name.clone(), count))
        .collect()
}

/// Log one warning per duplicated stat identity and return the duplicates.
pub fn warn_duplicate_stats(run_name: &str, stats: &[Stat]) -> Vec<MetricName> {
    find_duplicate_stats(stats)
        .into_iter()
        .map(|(name, count)| {
            emit_duplicate_stat(run_name, &name, count);
            name
        })
        .collect()
}
