//! Offline collaborators: instances from JSON files, a plain prompt adapter
//! and an executor that replays recorded completions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use evalrun_core::{
    AdapterSpec, Completion, Instance, Request, RequestResult, RequestState, ScenarioSpec,
    ScenarioState, CACHE_STATS,
};
use serde::Deserialize;

use crate::collaborators::{
    Adapter, AdapterFactory, Executor, Scenario, ScenarioFactory, ScenarioMetadata,
    TokenizerService,
};

pub const METHOD_GENERATION: &str = "generation";
pub const METHOD_MULTIPLE_CHOICE_JOINT: &str = "multiple_choice_joint";

const TRAIN_SPLIT: &str = "train";
const RECORDED_CACHE_LABEL: &str = "recorded_responses";

fn short_class_name(class_name: &str) -> &str {
    class_name.rsplit('.').next().unwrap_or(class_name)
}

/// Scenario whose instances are a JSON array stored in a file.
#[derive(Debug, Clone)]
pub struct FileScenario {
    name: String,
    description: String,
    tags: Vec<String>,
    path: PathBuf,
}

impl FileScenario {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            path: path.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Scenario for FileScenario {
    fn metadata(&self) -> ScenarioMetadata {
        ScenarioMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            output_path: None,
        }
    }

    async fn get_instances(&self, _output_path: &Path) -> anyhow::Result<Vec<Instance>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read instances from {}", self.path.display()))?;
        let instances: Vec<Instance> = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse instances in {}", self.path.display()))?;
        tracing::debug!(
            scenario = %self.name,
            path = %self.path.display(),
            count = instances.len(),
            "instances loaded"
        );
        Ok(instances)
    }
}

/// Resolves scenario specs to [`FileScenario`]s under a data directory.
///
/// - `file` with arg `path` (relative paths resolve against the data dir),
///   optional `name`;
/// - `bbq` / `*.BBQScenario` with arg `subject`, read from
///   `<data_dir>/bbq/<subject>.json`.
#[derive(Debug, Clone)]
pub struct FileScenarioFactory {
    data_dir: PathBuf,
}

impl FileScenarioFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

impl ScenarioFactory for FileScenarioFactory {
    fn create(&self, spec: &ScenarioSpec) -> anyhow::Result<Box<dyn Scenario>> {
        match short_class_name(&spec.class_name) {
            "file" | "FileScenario" => {
                let Some(path) = spec.arg_str("path") else {
                    bail!("scenario {} requires a `path` argument", spec.class_name);
                };
                let path = self.data_dir.join(path);
                let name = match spec.arg_str("name") {
                    Some(name) => name.to_string(),
                    None => path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "file".to_string()),
                };
                Ok(Box::new(FileScenario::new(name, path)))
            }
            "bbq" | "BBQScenario" => {
                let Some(subject) = spec.arg_str("subject") else {
                    bail!("scenario {} requires a `subject` argument", spec.class_name);
                };
                let path = self.data_dir.join("bbq").join(format!("{}.json", subject));
                Ok(Box::new(
                    FileScenario::new("bbq", path)
                        .with_description("Bias Benchmark for QA")
                        .with_tags(vec!["harms".to_string(), "bias".to_string()]),
                ))
            }
            other => bail!("unknown scenario class: {}", other),
        }
    }
}

/// Builds prompts by concatenating the spec's prefixes and suffixes.
///
/// Instances in the `train` split serve as in-context examples; everything
/// else is evaluated. With `multiple_choice_joint`, references are listed as
/// lettered choices and the expected output is the letter.
pub struct PromptAdapter {
    spec: AdapterSpec,
}

impl PromptAdapter {
    pub fn new(spec: AdapterSpec) -> Self {
        Self { spec }
    }

    fn is_multiple_choice(&self) -> bool {
        self.spec.method == METHOD_MULTIPLE_CHOICE_JOINT
    }

    fn render_input(&self, instance: &Instance) -> String {
        let mut text = format!(
            "{}{}{}",
            self.spec.input_prefix, instance.input, self.spec.input_suffix
        );
        if self.is_multiple_choice() {
            for (index, reference) in instance.references.iter().enumerate() {
                text.push_str(&format!("{}. {}\n", choice_letter(index), reference.output));
            }
        }
        text
    }

    fn expected_output(&self, instance: &Instance) -> Option<String> {
        let (index, reference) = instance
            .references
            .iter()
            .enumerate()
            .find(|(_, r)| r.is_correct())?;
        if self.is_multiple_choice() {
            Some(choice_letter(index).to_string())
        } else {
            Some(reference.output.clone())
        }
    }

    /// Choice letter to reference output, for multiple-choice requests.
    fn output_mapping(&self, instance: &Instance) -> Option<BTreeMap<String, String>> {
        if !self.is_multiple_choice() {
            return None;
        }
        Some(
            instance
                .references
                .iter()
                .enumerate()
                .map(|(index, reference)| (choice_letter(index).to_string(), reference.output.clone()))
                .collect(),
        )
    }

    fn build_prompt(&self, examples: &[&Instance], instance: &Instance) -> String {
        let mut prompt = String::new();
        if !self.spec.instructions.is_empty() {
            prompt.push_str(&self.spec.instructions);
            prompt.push('\n');
        }
        for example in examples {
            prompt.push_str(&self.render_input(example));
            prompt.push_str(&self.spec.output_prefix);
            prompt.push_str(&self.expected_output(example).unwrap_or_default());
            prompt.push_str(&self.spec.output_suffix);
            prompt.push('\n');
        }
        prompt.push_str(&self.render_input(instance));
        prompt.push_str(self.spec.output_prefix.trim_end());
        prompt
    }

    /// In-context examples for a trial: the train pool rotated by the trial
    /// index, capped at `max_train_instances`.
    fn examples_for_trial<'a>(&self, train: &[&'a Instance], trial: usize) -> Vec<&'a Instance> {
        if train.is_empty() {
            return Vec::new();
        }
        let offset = trial % train.len();
        train
            .iter()
            .cycle()
            .skip(offset)
            .take(self.spec.max_train_instances.min(train.len()))
            .copied()
            .collect()
    }
}

fn choice_letter(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}

fn is_train(instance: &Instance) -> bool {
    instance.split.as_deref() == Some(TRAIN_SPLIT)
}

#[async_trait]
impl Adapter for PromptAdapter {
    fn get_run_instances(&self, instances: Vec<Instance>) -> Vec<Instance> {
        let (train, eval): (Vec<_>, Vec<_>) = instances.into_iter().partition(is_train);
        let eval_cap = self.spec.max_eval_instances.unwrap_or(eval.len());
        train.into_iter().chain(eval.into_iter().take(eval_cap)).collect()
    }

    async fn adapt(
        &self,
        instances: &[Instance],
        _parallelism: usize,
    ) -> anyhow::Result<ScenarioState> {
        let train: Vec<&Instance> = instances.iter().filter(|i| is_train(i)).collect();
        let eval: Vec<&Instance> = instances.iter().filter(|i| !is_train(i)).collect();

        let mut request_states = Vec::with_capacity(eval.len() * self.spec.num_train_trials);
        for trial in 0..self.spec.num_train_trials {
            let examples = self.examples_for_trial(&train, trial);
            for instance in &eval {
                let request = Request {
                    model: self.spec.model.clone(),
                    prompt: self.build_prompt(&examples, instance),
                    temperature: self.spec.temperature,
                    num_completions: self.spec.num_outputs,
                    max_tokens: self.spec.max_tokens,
                    stop_sequences: self.spec.stop_sequences.clone(),
                };
                let mut state = RequestState::new((*instance).clone(), trial, request);
                state.num_train_instances = examples.len();
                state.output_mapping = self.output_mapping(instance);
                request_states.push(state);
            }
        }

        tracing::debug!(
            method = %self.spec.method,
            trials = self.spec.num_train_trials,
            requests = request_states.len(),
            "instances adapted"
        );
        Ok(ScenarioState::new(self.spec.clone(), request_states))
    }
}

/// Creates [`PromptAdapter`]s for the supported methods.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptAdapterFactory;

impl AdapterFactory for PromptAdapterFactory {
    fn create(
        &self,
        spec: &AdapterSpec,
        _tokenizer: Arc<dyn TokenizerService>,
    ) -> anyhow::Result<Box<dyn Adapter>> {
        match spec.method.as_str() {
            METHOD_GENERATION | METHOD_MULTIPLE_CHOICE_JOINT => {
                Ok(Box::new(PromptAdapter::new(spec.clone())))
            }
            other => bail!("unsupported adaptation method: {}", other),
        }
    }
}

/// One or many recorded completions.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Recorded {
    One(String),
    Many(Vec<String>),
}

impl Recorded {
    fn completions(&self) -> Vec<Completion> {
        match self {
            Recorded::One(text) => vec![Completion::text(text.clone())],
            Recorded::Many(texts) => texts.iter().cloned().map(Completion::text).collect(),
        }
    }
}

/// Fills results from recorded responses instead of calling a model.
///
/// Responses are looked up by instance ID first, then by exact prompt. A
/// request with no recorded response is an execution failure.
#[derive(Debug, Clone, Default)]
pub struct RecordedExecutor {
    responses: HashMap<String, Recorded>,
}

impl RecordedExecutor {
    /// Executor with no recordings; every request fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Record `completions` for an instance ID or prompt.
    pub fn with_response<I, S>(mut self, key: impl Into<String>, completions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses.insert(
            key.into(),
            Recorded::Many(completions.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Load a JSON object mapping instance ID or prompt to a completion
    /// string or an array of completion strings.
    pub async fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read responses from {}", path.display()))?;
        let responses: HashMap<String, Recorded> = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse responses in {}", path.display()))?;
        Ok(Self { responses })
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    fn lookup(&self, state: &RequestState) -> Option<&Recorded> {
        state
            .instance
            .id
            .as_deref()
            .and_then(|id| self.responses.get(id))
            .or_else(|| self.responses.get(&state.request.prompt))
    }
}

#[async_trait]
impl Executor for RecordedExecutor {
    async fn execute(&self, mut scenario_state: ScenarioState) -> anyhow::Result<ScenarioState> {
        for state in &mut scenario_state.request_states {
            let Some(recorded) = self.lookup(state) else {
                CACHE_STATS.record_miss(RECORDED_CACHE_LABEL);
                bail!(
                    "no recorded response for instance {} (trial {})",
                    state.instance.display_id(),
                    state.train_trial_index
                );
            };
            CACHE_STATS.record_hit(RECORDED_CACHE_LABEL);
            let mut completions = recorded.completions();
            completions.truncate(state.request.num_completions.max(1));
            let mut result = RequestResult::ok(completions);
            result.cached = true;
            state.result = Some(result);
        }
        Ok(scenario_state)
    }
}
