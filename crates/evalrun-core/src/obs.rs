//! Structured observability hooks for the run lifecycle.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`]
//! - Emission functions for lifecycle events: start, phase change, metric
//!   evaluated, duplicate stat, finish, failure
//!
//! Events are emitted at `info!` level except duplicates and failures, which
//! are warnings. Filtering follows `RUST_LOG`.

use tracing::{info, warn};

/// Run-scoped tracing span.
///
/// Attach it to the run future with `tracing::Instrument` so every event
/// emitted while the run is in flight carries the run name:
///
/// ```ignore
/// runner.run_one(spec).instrument(run_span(spec.name())).await
/// ```
pub fn run_span(run_name: &str) -> tracing::Span {
    tracing::info_span!("evalrun.run", run = %run_name)
}

pub fn emit_run_started(run_name: &str, suite: &str, num_metrics: usize) {
    info!(event = "run.started", run = %run_name, suite = %suite, num_metrics = num_metrics);
}

/// Emit event: the run entered a new lifecycle phase.
pub fn emit_run_phase(run_name: &str, phase: &dyn std::fmt::Display) {
    info!(event = "run.phase", run = %run_name, phase = %phase);
}

pub fn emit_metric_evaluated(run_name: &str, metric: &str, num_stats: usize, duration_ms: u64) {
    info!(
        event = "metric.evaluated",
        run = %run_name,
        metric = %metric,
        num_stats = num_stats,
        duration_ms = duration_ms,
    );
}

/// Emit warning: the same stat identity was produced more than once.
pub fn emit_duplicate_stat(run_name: &str, stat_name: &dyn std::fmt::Display, count: usize) {
    warn!(event = "stats.duplicate", run = %run_name, stat = %stat_name, count = count);
}

pub fn emit_run_finished(run_name: &str, duration_ms: u64, num_stats: usize, persisted: bool) {
    info!(
        event = "run.finished",
        run = %run_name,
        duration_ms = duration_ms,
        num_stats = num_stats,
        persisted = persisted,
    );
}

pub fn emit_run_failed(run_name: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run = %run_name, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_has_name() {
        let span = run_span("test-run");
        let _entered = span.enter();
        emit_run_phase("test-run", &"init");
    }
}
