//! Declarative specs that make up a run: object specs, adapter and
//! augmentation configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named class plus free-form arguments.
///
/// `args` is a JSON object; key order is sorted so serialized specs are
/// byte-stable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObjectSpec {
    /// Name used to resolve the implementation (e.g. `"bbq"`).
    pub class_name: String,

    /// Constructor arguments.
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Which scenario to load.
pub type ScenarioSpec = ObjectSpec;

/// Which metric to evaluate.
pub type MetricSpec = ObjectSpec;

/// A single perturbation applied by the data augmenter.
pub type PerturbationSpec = ObjectSpec;

impl ObjectSpec {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            args: Map::new(),
        }
    }

    /// Add an argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// String argument, if present and a string.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Unsigned integer argument, if present and numeric.
    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.args.get(key).and_then(Value::as_u64)
    }
}

/// How instances are turned into requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdapterSpec {
    /// Adaptation method (e.g. `generation`, `multiple_choice_joint`).
    pub method: String,

    #[serde(default)]
    pub instructions: String,

    #[serde(default)]
    pub input_prefix: String,

    #[serde(default)]
    pub input_suffix: String,

    #[serde(default)]
    pub output_prefix: String,

    #[serde(default)]
    pub output_suffix: String,

    /// In-context examples per prompt.
    #[serde(default)]
    pub max_train_instances: usize,

    /// Cap on evaluation instances; `None` means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_eval_instances: Option<usize>,

    /// Completions requested per prompt.
    pub num_outputs: usize,

    /// Number of independent trials over the training-example sampling.
    pub num_train_trials: usize,

    /// Model identifier, `organization/name`.
    pub model: String,

    pub temperature: f64,

    pub max_tokens: usize,

    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl Default for AdapterSpec {
    fn default() -> Self {
        Self {
            method: "generation".to_string(),
            instructions: String::new(),
            input_prefix: String::new(),
            input_suffix: String::new(),
            output_prefix: String::new(),
            output_suffix: String::new(),
            max_train_instances: 0,
            max_eval_instances: None,
            num_outputs: 1,
            num_train_trials: 1,
            model: "local/recorded".to_string(),
            temperature: 0.0,
            max_tokens: 100,
            stop_sequences: Vec::new(),
        }
    }
}

/// Data augmentation settings. The default does nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataAugmenterSpec {
    #[serde(default)]
    pub perturbation_specs: Vec<PerturbationSpec>,

    #[serde(default)]
    pub should_augment_train_instances: bool,

    #[serde(default = "default_true")]
    pub should_include_original_train: bool,

    #[serde(default)]
    pub should_augment_eval_instances: bool,

    #[serde(default = "default_true")]
    pub should_include_original_eval: bool,

    #[serde(default)]
    pub should_skip_unchanged_eval: bool,

    #[serde(default = "default_seeds")]
    pub seeds_per_instance: usize,
}

fn default_true() -> bool {
    true
}

fn default_seeds() -> usize {
    1
}

impl Default for DataAugmenterSpec {
    fn default() -> Self {
        Self {
            perturbation_specs: Vec::new(),
            should_augment_train_instances: false,
            should_include_original_train: true,
            should_augment_eval_instances: false,
            should_include_original_eval: true,
            should_skip_unchanged_eval: false,
            seeds_per_instance: 1,
        }
    }
}

impl DataAugmenterSpec {
    /// Whether this spec changes the instance set at all.
    pub fn is_noop(&self) -> bool {
        self.perturbation_specs.is_empty()
            || (!self.should_augment_train_instances && !self.should_augment_eval_instances)
    }
}
