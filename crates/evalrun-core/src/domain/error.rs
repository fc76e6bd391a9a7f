//! Domain-level error taxonomy for metric evaluation.

use crate::cache::CacheError;
use crate::unique::AmbiguityError;

/// Errors produced while evaluating a metric over a scenario state.
///
/// Every variant is fatal for the metric that raised it: an evaluation run is
/// only meaningful if every instance is accounted for.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Ambiguity(#[from] AmbiguityError),

    #[error("structural precondition violated: {0}")]
    StructuralPrecondition(String),

    #[error("malformed references on instance {instance_id}: {reason}")]
    MalformedReferences { instance_id: String, reason: String },

    #[error("request for instance {instance_id} has no result")]
    MissingResult { instance_id: String },

    #[error("unknown metric class: {0}")]
    UnknownMetric(String),

    #[error("invalid arguments for metric {class_name}: {reason}")]
    InvalidMetricArgs { class_name: String, reason: String },

    #[error("eval cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

/// Result type for metric evaluation.
pub type Result<T> = std::result::Result<T, EvalError>;
