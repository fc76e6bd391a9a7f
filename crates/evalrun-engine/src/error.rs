//! Run-level error types.

use std::fmt;

use evalrun_core::EvalError;
use serde::Serialize;

/// Lifecycle phase of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    ScenarioLoaded,
    Adapted,
    Executed,
    MetricsEvaluated,
    Persisted,
    /// Terminal state of a run in skip-instances mode; nothing is written.
    Skipped,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::ScenarioLoaded => "scenario_loaded",
            Self::Adapted => "adapted",
            Self::Executed => "executed",
            Self::MetricsEvaluated => "metrics_evaluated",
            Self::Persisted => "persisted",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// What went wrong in a run.
#[derive(Debug, thiserror::Error)]
pub enum RunErrorKind {
    #[error("scenario error: {0:#}")]
    Scenario(anyhow::Error),

    #[error("adapter error: {0:#}")]
    Adapter(anyhow::Error),

    #[error("data preprocessing error: {0:#}")]
    Preprocess(anyhow::Error),

    /// The executor could not obtain results from the model backend.
    #[error("upstream execution error: {0:#}")]
    UpstreamExecution(anyhow::Error),

    #[error("metric {metric} failed: {source}")]
    Metric {
        metric: String,
        #[source]
        source: EvalError,
    },

    #[error("failed to persist run artifacts: {0:#}")]
    Persist(anyhow::Error),
}

/// A failed run: which run, the last phase it reached, and why.
#[derive(Debug, thiserror::Error)]
#[error("run {run_name} failed after phase {phase}: {kind}")]
pub struct RunError {
    pub run_name: String,
    pub phase: RunPhase,
    #[source]
    pub kind: RunErrorKind,
}

impl RunError {
    pub fn new(run_name: impl Into<String>, phase: RunPhase, kind: RunErrorKind) -> Self {
        Self {
            run_name: run_name.into(),
            phase,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(RunPhase::MetricsEvaluated.to_string(), "metrics_evaluated");
        assert_eq!(RunPhase::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_run_error_message_has_context() {
        let err = RunError::new(
            "bbq:subject=age",
            RunPhase::Executed,
            RunErrorKind::Metric {
                metric: "bbq".to_string(),
                source: EvalError::StructuralPrecondition("no ambiguous examples".to_string()),
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("bbq:subject=age"));
        assert!(msg.contains("executed"));
        assert!(msg.contains("no ambiguous examples"));
    }

    #[test]
    fn test_upstream_error_keeps_chain() {
        let inner = anyhow::anyhow!("connection refused").context("request id3 failed");
        let err = RunErrorKind::UpstreamExecution(inner);
        let msg = err.to_string();
        assert!(msg.contains("request id3 failed"));
        assert!(msg.contains("connection refused"));
    }
}
