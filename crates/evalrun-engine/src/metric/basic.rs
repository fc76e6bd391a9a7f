//! Exact-match family of reference-based metrics.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use evalrun_core::{
    find_unique, EvalError, MetricName, MetricResult, MetricSpec, PerInstanceStats,
    ScenarioState, Stat,
};

use super::Metric;
use crate::collaborators::MetricService;

/// A single scoring function comparing gold to prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scorer {
    ExactMatch,
    QuasiExactMatch,
    PrefixExactMatch,
    QuasiPrefixExactMatch,
}

impl Scorer {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "exact_match" => Some(Self::ExactMatch),
            "quasi_exact_match" => Some(Self::QuasiExactMatch),
            "prefix_exact_match" => Some(Self::PrefixExactMatch),
            "quasi_prefix_exact_match" => Some(Self::QuasiPrefixExactMatch),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::QuasiExactMatch => "quasi_exact_match",
            Self::PrefixExactMatch => "prefix_exact_match",
            Self::QuasiPrefixExactMatch => "quasi_prefix_exact_match",
        }
    }

    fn score(self, gold: &str, pred: &str) -> bool {
        match self {
            Self::ExactMatch => gold.trim() == pred.trim(),
            Self::QuasiExactMatch => normalize_text(gold) == normalize_text(pred),
            Self::PrefixExactMatch => pred.trim().starts_with(gold.trim()),
            Self::QuasiPrefixExactMatch => normalize_text(pred).starts_with(&normalize_text(gold)),
        }
    }
}

/// Lowercase, drop punctuation and the articles a/an/the, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    lowered
        .split_whitespace()
        .filter(|word| !matches!(*word, "a" | "an" | "the"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scores the first completion against every reference tagged `correct`.
#[derive(Debug, Clone)]
pub struct BasicMetric {
    scorers: Vec<Scorer>,
}

impl BasicMetric {
    /// Build from metric names; unknown names are rejected.
    pub fn new<S: AsRef<str>>(names: &[S]) -> evalrun_core::Result<Self> {
        let scorers = names
            .iter()
            .map(|name| {
                Scorer::parse(name.as_ref()).ok_or_else(|| EvalError::InvalidMetricArgs {
                    class_name: "basic".to_string(),
                    reason: format!("unknown basic metric name: {}", name.as_ref()),
                })
            })
            .collect::<evalrun_core::Result<Vec<_>>>()?;
        Ok(Self { scorers })
    }

    /// Build from a metric spec; reads the `names` array arg (default empty).
    pub fn from_spec(spec: &MetricSpec) -> evalrun_core::Result<Self> {
        let invalid = |reason: String| EvalError::InvalidMetricArgs {
            class_name: spec.class_name.clone(),
            reason,
        };
        let names: Vec<&str> = match spec.args.get("names") {
            None => Vec::new(),
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_str()
                        .ok_or_else(|| invalid(format!("names must be strings, got {}", v)))
                })
                .collect::<evalrun_core::Result<_>>()?,
            Some(other) => return Err(invalid(format!("names must be an array, got {}", other))),
        };
        Self::new(names.as_slice()).map_err(|e| match e {
            EvalError::InvalidMetricArgs { reason, .. } => invalid(reason),
            other => other,
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.scorers.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl Metric for BasicMetric {
    fn name(&self) -> &str {
        "basic"
    }

    async fn evaluate(
        &self,
        scenario_state: &ScenarioState,
        _metric_service: &dyn MetricService,
        _eval_cache_path: &Path,
        _parallelism: usize,
    ) -> evalrun_core::Result<MetricResult> {
        if self.scorers.is_empty() {
            return Ok(MetricResult::default());
        }

        // Keyed by configured position first so output follows `names`.
        let mut aggregated: BTreeMap<(usize, MetricName), Stat> = BTreeMap::new();
        let mut per_instance = Vec::new();

        let index = scenario_state.index();
        for trial in 0..scenario_state.adapter_spec.num_train_trials {
            for &instance in index.instances() {
                let instance_id = instance.display_id().to_string();
                let request_state = find_unique(
                    index.request_states(trial, instance, None),
                    format!("request state for instance {} at trial {}", instance_id, trial),
                )?;
                let result = request_state
                    .result
                    .as_ref()
                    .ok_or_else(|| EvalError::MissingResult {
                        instance_id: instance_id.clone(),
                    })?;
                let completion = result
                    .completions
                    .first()
                    .map(|c| c.text.trim())
                    .unwrap_or("");
                // A completion outside the multiple-choice mapping matches nothing.
                let prediction = request_state.map_output(completion);
                let golds: Vec<&str> = instance
                    .correct_references()
                    .map(|r| r.output.as_str())
                    .collect();

                let mut stats = Vec::with_capacity(self.scorers.len());
                for (position, scorer) in self.scorers.iter().enumerate() {
                    let score = prediction
                        .is_some_and(|prediction| golds.iter().any(|gold| scorer.score(gold, prediction)));
                    let name = MetricName::new(scorer.name())
                        .with_split(instance.split.clone())
                        .with_sub_split(instance.sub_split.clone())
                        .with_perturbation(instance.perturbation.clone());

                    aggregated
                        .entry((position, name.clone()))
                        .or_insert_with(|| Stat::new(name.clone()))
                        .add_bool(score);

                    let mut stat = Stat::new(name);
                    stat.add_bool(score);
                    stats.push(stat);
                }

                per_instance.push(PerInstanceStats {
                    instance_id,
                    perturbation: instance.perturbation.clone(),
                    train_trial_index: trial,
                    stats,
                });
            }
        }

        Ok(MetricResult::new(aggregated.into_values().collect(), per_instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::LocalMetricService;
    use evalrun_core::{
        AdapterSpec, Completion, Instance, Reference, Request, RequestResult, RequestState,
    };

    fn request() -> Request {
        Request {
            model: "test/model".to_string(),
            prompt: "p".to_string(),
            temperature: 0.0,
            num_completions: 1,
            max_tokens: 5,
            stop_sequences: vec![],
        }
    }

    fn state(id: &str, split: &str, gold: &str, completion: &str) -> RequestState {
        let instance = Instance::new(
            format!("q{}", id),
            vec![
                Reference::new(gold, &["correct"]),
                Reference::new("wrong", &[]),
            ],
        )
        .with_split(split)
        .with_id(id);
        RequestState::new(instance, 0, request())
            .with_result(RequestResult::ok(vec![Completion::text(completion)]))
    }

    async fn evaluate(metric: &BasicMetric, states: Vec<RequestState>) -> evalrun_core::Result<MetricResult> {
        let dir = tempfile::tempdir().expect("tempdir");
        let scenario = ScenarioState::new(AdapterSpec::default(), states);
        metric
            .evaluate(&scenario, &LocalMetricService::new(), dir.path(), 1)
            .await
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  The Cat, sat on a MAT!  "), "cat sat on mat");
        assert_eq!(normalize_text("an apple"), "apple");
    }

    #[test]
    fn test_scorers() {
        assert!(Scorer::ExactMatch.score("Paris", " Paris "));
        assert!(!Scorer::ExactMatch.score("Paris", "paris"));
        assert!(Scorer::QuasiExactMatch.score("Paris", "the paris."));
        assert!(Scorer::PrefixExactMatch.score("B", "B) the second"));
        assert!(Scorer::QuasiPrefixExactMatch.score("b", "B. The second"));
    }

    #[test]
    fn test_unknown_name_rejected() {
        let spec = MetricSpec::new("basic").with_arg("names", serde_json::json!(["bleu_4"]));
        let err = BasicMetric::from_spec(&spec).unwrap_err();
        assert!(matches!(err, EvalError::InvalidMetricArgs { ref reason, .. } if reason.contains("bleu_4")));
    }

    #[tokio::test]
    async fn test_empty_names_produce_no_stats() {
        let metric = BasicMetric::new::<&str>(&[]).expect("metric");
        let result = evaluate(&metric, vec![state("id0", "test", "A", "A")]).await.expect("evaluate");
        assert!(result.aggregated_stats().is_empty());
        assert!(result.per_instance_stats().is_empty());
    }

    #[tokio::test]
    async fn test_stats_follow_configured_order_and_split() {
        let metric = BasicMetric::new(&["quasi_exact_match", "exact_match"]).expect("metric");
        let result = evaluate(
            &metric,
            vec![
                state("id0", "test", "Paris", "paris"),
                state("id1", "test", "Rome", "Rome"),
                state("id2", "valid", "Oslo", "Bergen"),
            ],
        )
        .await
        .expect("evaluate");

        let names: Vec<String> = result
            .aggregated_stats()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "quasi_exact_match [split=test]",
                "quasi_exact_match [split=valid]",
                "exact_match [split=test]",
                "exact_match [split=valid]",
            ]
        );
        assert_eq!(result.aggregated_stats()[0].mean(), Some(1.0));
        assert_eq!(result.aggregated_stats()[2].mean(), Some(0.5));
        assert_eq!(result.aggregated_stats()[3].mean(), Some(0.0));
        assert_eq!(result.per_instance_stats().len(), 3);
        assert_eq!(result.per_instance_stats()[0].stats.len(), 2);
    }

    fn choice_state(id: &str, completion: &str) -> RequestState {
        let mapping = BTreeMap::from([
            ("A".to_string(), "the grandmother".to_string()),
            ("B".to_string(), "the grandson".to_string()),
            ("C".to_string(), "unknown".to_string()),
        ]);
        let instance = Instance::new(
            format!("q{}", id),
            vec![
                Reference::new("the grandmother", &[]),
                Reference::new("the grandson", &[]),
                Reference::new("unknown", &["correct"]),
            ],
        )
        .with_split("test")
        .with_id(id);
        RequestState::new(instance, 0, request())
            .with_output_mapping(mapping)
            .with_result(RequestResult::ok(vec![Completion::text(completion)]))
    }

    #[tokio::test]
    async fn test_choice_letters_scored_through_mapping() {
        let metric = BasicMetric::new(&["exact_match", "quasi_exact_match"]).expect("metric");
        let result = evaluate(
            &metric,
            vec![choice_state("id0", " C"), choice_state("id1", "C")],
        )
        .await
        .expect("evaluate");
        for stat in result.aggregated_stats() {
            assert_eq!(stat.mean(), Some(1.0), "{}", stat.name());
        }
    }

    #[tokio::test]
    async fn test_unmapped_choice_scores_zero() {
        let metric = BasicMetric::new(&["exact_match", "quasi_prefix_exact_match"]).expect("metric");
        // The reference text itself is not a valid choice.
        let result = evaluate(
            &metric,
            vec![choice_state("id0", "unknown"), choice_state("id1", "A")],
        )
        .await
        .expect("evaluate");
        for stat in result.aggregated_stats() {
            assert_eq!(stat.mean(), Some(0.0), "{}", stat.name());
            assert_eq!(stat.count(), 2);
        }
    }

    #[tokio::test]
    async fn test_missing_result_fails() {
        let metric = BasicMetric::new(&["exact_match"]).expect("metric");
        let mut s = state("id0", "test", "A", "A");
        s.result = None;
        let err = evaluate(&metric, vec![s]).await.unwrap_err();
        assert!(matches!(err, EvalError::MissingResult { .. }));
    }
}
