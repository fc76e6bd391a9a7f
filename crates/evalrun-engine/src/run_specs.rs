//! Canonical run specs built from short descriptions such as
//! `bbq:subject=age,method=multiple_choice_joint`.

use evalrun_core::{AdapterSpec, InvalidRunName, MetricSpec, ObjectSpec, RunSpec, ScenarioSpec};
use serde_json::Value;

use crate::local::{METHOD_GENERATION, METHOD_MULTIPLE_CHOICE_JOINT};

/// Errors from parsing or expanding a run-spec description.
#[derive(Debug, thiserror::Error)]
pub enum RunSpecError {
    #[error("malformed run spec description {description:?}: {reason}")]
    Malformed { description: String, reason: String },

    #[error("unknown run spec name: {0}")]
    UnknownName(String),

    #[error("run spec {name} is missing argument {arg}")]
    MissingArg { name: String, arg: String },

    #[error("run spec {name} does not accept argument {arg}")]
    UnexpectedArg { name: String, arg: String },

    #[error("invalid adaptation method for {name}: {method}")]
    InvalidMethod { name: String, method: String },

    #[error(transparent)]
    InvalidName(#[from] InvalidRunName),
}

pub type Result<T> = std::result::Result<T, RunSpecError>;

/// Parse `name:key=value,key=value` into an object spec.
pub fn parse_object_spec(description: &str) -> Result<ObjectSpec> {
    let malformed = |reason: &str| RunSpecError::Malformed {
        description: description.to_string(),
        reason: reason.to_string(),
    };

    let (name, rest) = match description.split_once(':') {
        Some((name, rest)) => (name.trim(), Some(rest)),
        None => (description.trim(), None),
    };
    if name.is_empty() {
        return Err(malformed("empty name"));
    }

    let mut spec = ObjectSpec::new(name);
    if let Some(rest) = rest.filter(|r| !r.trim().is_empty()) {
        for pair in rest.split(',') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| malformed(&format!("expected key=value, got {:?}", pair)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(malformed("empty argument name"));
            }
            spec.args
                .insert(key.to_string(), Value::String(value.trim().to_string()));
        }
    }
    Ok(spec)
}

/// Expand a parsed description into run specs.
///
/// The `model` argument is peeled off before the canonical builder runs and
/// applied to every resulting spec.
pub fn construct_run_specs(spec: &ObjectSpec) -> Result<Vec<RunSpec>> {
    let name = spec.class_name.as_str();
    let mut args = spec.args.clone();
    let model = args
        .remove("model")
        .and_then(|v| v.as_str().map(str::to_string));

    let arg = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
    let known = |allowed: &[&str]| -> Result<()> {
        match args.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(k) => Err(RunSpecError::UnexpectedArg {
                name: name.to_string(),
                arg: k.clone(),
            }),
            None => Ok(()),
        }
    };
    let required = |key: &str| {
        arg(key).ok_or_else(|| RunSpecError::MissingArg {
            name: name.to_string(),
            arg: key.to_string(),
        })
    };

    let run_spec = match name {
        "bbq" => {
            known(&["subject", "method"][..])?;
            let subject = required("subject")?;
            let method = arg("method").unwrap_or_else(|| METHOD_MULTIPLE_CHOICE_JOINT.to_string());
            bbq_spec(&subject, &method)?
        }
        "file" => {
            known(&["path", "name"][..])?;
            let path = required("path")?;
            file_spec(&path, arg("name").as_deref())?
        }
        other => return Err(RunSpecError::UnknownName(other.to_string())),
    };

    let run_specs = match model {
        Some(model) => vec![with_model(run_spec, &model)?],
        None => vec![run_spec],
    };
    Ok(run_specs)
}

/// Parse and expand a run-spec description in one step.
pub fn run_specs_from_description(description: &str) -> Result<Vec<RunSpec>> {
    construct_run_specs(&parse_object_spec(description)?)
}

fn with_model(run_spec: RunSpec, model: &str) -> Result<RunSpec> {
    let name = format!("{},model={}", run_spec.name(), model);
    let adapter_spec = AdapterSpec {
        model: model.to_string(),
        ..run_spec.adapter_spec().clone()
    };
    Ok(RunSpec::new(
        name,
        run_spec.scenario_spec().clone(),
        adapter_spec,
        run_spec.metric_specs().to_vec(),
    )?
    .with_data_augmenter(run_spec.data_augmenter_spec().clone())
    .with_groups(run_spec.groups().to_vec()))
}

/// `basic` metric over the given names.
pub fn basic_metric_specs(names: &[&str]) -> Vec<MetricSpec> {
    vec![MetricSpec::new("basic").with_arg("names", names.to_vec())]
}

/// The four exact-match variants.
pub fn exact_match_metric_specs() -> Vec<MetricSpec> {
    basic_metric_specs(&[
        "exact_match",
        "quasi_exact_match",
        "prefix_exact_match",
        "quasi_prefix_exact_match",
    ])
}

/// Bias score plus the exact-match family.
pub fn bbq_metric_specs() -> Vec<MetricSpec> {
    let mut specs = vec![MetricSpec::new("bbq")];
    specs.extend(exact_match_metric_specs());
    specs
}

/// Adapter spec for answering multiple-choice questions with a single letter.
pub fn multiple_choice_joint_adapter_spec(
    instructions: &str,
    input_noun: &str,
    output_noun: &str,
    max_train_instances: usize,
) -> AdapterSpec {
    AdapterSpec {
        method: METHOD_MULTIPLE_CHOICE_JOINT.to_string(),
        instructions: if instructions.is_empty() {
            String::new()
        } else {
            format!("{}\n", instructions)
        },
        input_prefix: format!("{}: ", input_noun),
        input_suffix: "\n".to_string(),
        output_prefix: format!("{}: ", output_noun),
        output_suffix: "\n".to_string(),
        max_train_instances,
        num_outputs: 1,
        max_tokens: 5,
        temperature: 0.0,
        stop_sequences: vec!["\n".to_string()],
        ..AdapterSpec::default()
    }
}

pub fn bbq_spec(subject: &str, method: &str) -> Result<RunSpec> {
    if method != METHOD_MULTIPLE_CHOICE_JOINT {
        return Err(RunSpecError::InvalidMethod {
            name: "bbq".to_string(),
            method: method.to_string(),
        });
    }
    let scenario_spec = ScenarioSpec::new("bbq").with_arg("subject", subject);
    let adapter_spec = multiple_choice_joint_adapter_spec(
        "The following are multiple choice questions (with answers).",
        "Passage",
        "Answer",
        5,
    );
    Ok(RunSpec::new(
        format!("bbq:subject={},method={}", subject, method),
        scenario_spec,
        adapter_spec,
        bbq_metric_specs(),
    )?
    .with_groups(vec!["bbq".to_string()]))
}

/// Generation over instances stored in a JSON file, scored by exact match.
pub fn file_spec(path: &str, name: Option<&str>) -> Result<RunSpec> {
    let mut scenario_spec = ScenarioSpec::new("file").with_arg("path", path);
    if let Some(name) = name {
        scenario_spec = scenario_spec.with_arg("name", name);
    }
    let adapter_spec = AdapterSpec {
        method: METHOD_GENERATION.to_string(),
        input_prefix: "Input: ".to_string(),
        input_suffix: "\n".to_string(),
        output_prefix: "Output: ".to_string(),
        output_suffix: "\n".to_string(),
        max_tokens: 20,
        stop_sequences: vec!["\n".to_string()],
        ..AdapterSpec::default()
    };
    Ok(RunSpec::new(
        format!("file:path={}", path),
        scenario_spec,
        adapter_spec,
        exact_match_metric_specs(),
    )?)
}
