//! Model requests, their results and the request state that pairs them with
//! an instance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::instance::Instance;

/// A single token of a completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub text: String,
    #[serde(default)]
    pub logprob: f64,
}

/// One generated output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub text: String,

    #[serde(default)]
    pub logprob: f64,

    #[serde(default)]
    pub tokens: Vec<Token>,
}

impl Completion {
    /// A completion with only text (no token breakdown).
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            logprob: 0.0,
            tokens: Vec::new(),
        }
    }
}

/// What is sent to the model-serving backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub num_completions: usize,
    pub max_tokens: usize,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

/// What comes back from the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestResult {
    pub success: bool,

    pub completions: Vec<Completion>,

    /// Whether the result was served from the backend cache.
    #[serde(default)]
    pub cached: bool,

    /// Seconds spent on the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_time: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestResult {
    /// Successful result with the given completions.
    pub fn ok(completions: Vec<Completion>) -> Self {
        Self {
            success: true,
            completions,
            cached: false,
            request_time: None,
            error: None,
        }
    }
}

/// An instance (for one training trial) paired with its request and, once
/// executed, the result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestState {
    pub instance: Instance,

    /// Which reference this request scores, for per-reference adaptation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_index: Option<usize>,

    pub train_trial_index: usize,

    /// Maps a raw completion (e.g. a choice letter) to the reference output
    /// it stands for. Set by multiple-choice adapters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_mapping: Option<BTreeMap<String, String>>,

    pub request: Request,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RequestResult>,

    #[serde(default)]
    pub num_train_instances: usize,

    #[serde(default)]
    pub prompt_truncated: bool,
}

impl RequestState {
    pub fn new(instance: Instance, train_trial_index: usize, request: Request) -> Self {
        Self {
            instance,
            reference_index: None,
            train_trial_index,
            output_mapping: None,
            request,
            result: None,
            num_train_instances: 0,
            prompt_truncated: false,
        }
    }

    pub fn with_result(mut self, result: RequestResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_output_mapping(mut self, output_mapping: BTreeMap<String, String>) -> Self {
        self.output_mapping = Some(output_mapping);
        self
    }

    /// Translate a completion through the output mapping.
    ///
    /// Without a mapping the completion is returned as-is; with one, text
    /// that is not a mapped key yields `None`.
    pub fn map_output<'s>(&'s self, completion: &'s str) -> Option<&'s str> {
        match &self.output_mapping {
            Some(mapping) => mapping.get(completion).map(String::as_str),
            None => Some(completion),
        }
    }
}
