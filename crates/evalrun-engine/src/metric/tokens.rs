//! Token accounting for every run.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use evalrun_core::{EvalError, FsEvalCache, MetricResult, ScenarioState, Stat};

use super::Metric;
use crate::collaborators::{MetricService, TokenizerService};

/// Counts requests and tokens sent to / received from the backend.
///
/// Appended to every run by the runner, including dry runs, so cost can be
/// estimated without computing the configured metrics. Token counts are
/// memoized in the eval cache.
pub struct TokensMetric {
    tokenizer: Arc<dyn TokenizerService>,
}

impl TokensMetric {
    pub fn new(tokenizer: Arc<dyn TokenizerService>) -> Self {
        Self { tokenizer }
    }

    async fn count_tokens(
        &self,
        cache: &FsEvalCache,
        model: &str,
        text: &str,
    ) -> evalrun_core::Result<usize> {
        let key = format!("num_tokens\u{0}{}\u{0}{}", model, text);
        cache
            .get_or_compute(&key, || async {
                self.tokenizer
                    .tokenize(model, text)
                    .await
                    .map(|tokens| tokens.len())
                    .map_err(|e| EvalError::Tokenizer(format!("{:#}", e)))
            })
            .await
    }
}

#[async_trait]
impl Metric for TokensMetric {
    fn name(&self) -> &str {
        "tokens"
    }

    async fn evaluate(
        &self,
        scenario_state: &ScenarioState,
        metric_service: &dyn MetricService,
        eval_cache_path: &Path,
        _parallelism: usize,
    ) -> evalrun_core::Result<MetricResult> {
        let cache = metric_service.eval_cache(eval_cache_path)?;

        let mut num_requests = Stat::new("num_requests");
        let mut num_prompt_tokens = Stat::new("num_prompt_tokens");
        let mut num_completion_tokens = Stat::new("num_completion_tokens");
        let mut num_output_tokens = Stat::new("num_output_tokens");

        for state in &scenario_state.request_states {
            let request = &state.request;
            let prompt_tokens = self
                .count_tokens(&cache, &request.model, &request.prompt)
                .await?;

            let mut completion_tokens = 0usize;
            if let Some(result) = &state.result {
                for completion in &result.completions {
                    completion_tokens += if completion.tokens.is_empty() {
                        self.count_tokens(&cache, &request.model, &completion.text)
                            .await?
                    } else {
                        completion.tokens.len()
                    };
                }
            }

            num_requests.add(1.0);
            num_prompt_tokens.add(prompt_tokens as f64);
            num_completion_tokens.add(completion_tokens as f64);
            num_output_tokens.add((request.max_tokens * request.num_completions) as f64);
        }

        Ok(MetricResult::new(
            vec![
                num_requests,
                num_prompt_tokens,
                num_completion_tokens,
                num_output_tokens,
            ],
            Vec::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LocalMetricService, WhitespaceTokenizer};
    use evalrun_core::{
        AdapterSpec, Completion, Instance, Request, RequestResult, RequestState, Token,
    };

    fn state(prompt: &str, completions: Vec<Completion>) -> RequestState {
        let request = Request {
            model: "test/model".to_string(),
            prompt: prompt.to_string(),
            temperature: 0.0,
            num_completions: 2,
            max_tokens: 10,
            stop_sequences: vec![],
        };
        RequestState::new(Instance::new(prompt, vec![]), 0, request)
            .with_result(RequestResult::ok(completions))
    }

    #[tokio::test]
    async fn test_counts_tokens() {
        let mut tokenized = Completion::text("ignored text here");
        tokenized.tokens = vec![Token {
            text: "x".to_string(),
            logprob: 0.0,
        }];
        let scenario = ScenarioState::new(
            AdapterSpec::default(),
            vec![
                state("one two three", vec![Completion::text("a b"), tokenized]),
                state("four", vec![]),
            ],
        );

        let dir = tempfile::tempdir().expect("tempdir");
        let result = TokensMetric::new(Arc::new(WhitespaceTokenizer))
            .evaluate(&scenario, &LocalMetricService::new(), dir.path(), 1)
            .await
            .expect("evaluate");

        let stats = result.aggregated_stats();
        assert_eq!(stats[0].name().name, "num_requests");
        assert_eq!(stats[0].sum(), 2.0);
        assert_eq!(stats[1].sum(), 4.0);
        assert_eq!(stats[2].sum(), 3.0);
        assert_eq!(stats[3].sum(), 40.0);
    }

    #[tokio::test]
    async fn test_token_counts_are_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = LocalMetricService::new();
        let scenario = ScenarioState::new(
            AdapterSpec::default(),
            vec![state("cached prompt words", vec![Completion::text("x")])],
        );
        let metric = TokensMetric::new(Arc::new(WhitespaceTokenizer));
        metric
            .evaluate(&scenario, &service, dir.path(), 1)
            .await
            .expect("first");

        let cache = service.eval_cache(dir.path()).expect("cache");
        let key = format!("num_tokens\u{0}{}\u{0}{}", "test/model", "cached prompt words");
        let cached: Option<usize> = cache.get(&key).expect("get");
        assert_eq!(cached, Some(3));
    }

    #[tokio::test]
    async fn test_empty_state_has_empty_stats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = TokensMetric::new(Arc::new(WhitespaceTokenizer))
            .evaluate(
                &ScenarioState::new(AdapterSpec::default(), vec![]),
                &LocalMetricService::new(),
                dir.path(),
                1,
            )
            .await
            .expect("evaluate");
        assert_eq!(result.aggregated_stats().len(), 4);
        assert!(result.aggregated_stats().iter().all(|s| s.count() == 0));
    }
}
