//! Run specification.

use serde::{Deserialize, Serialize};

use super::spec::{AdapterSpec, DataAugmenterSpec, MetricSpec, ScenarioSpec};

/// Directory under `runs/<suite>` shared by every run's eval cache.
pub const EVAL_CACHE_DIR: &str = "eval_cache";

/// A run name that cannot be used as a run directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid run name {name:?}: {reason}")]
pub struct InvalidRunName {
    pub name: String,
    pub reason: &'static str,
}

/// Everything needed to do a single run: which scenario, how to adapt it and
/// which metrics to compute.
///
/// The name doubles as the run's output directory, so it is normalized once
/// at construction (path separators become `_`) and never changes after.
/// Names that would resolve outside a single child of the suite directory
/// are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RunSpecFields")]
pub struct RunSpec {
    name: String,
    scenario_spec: ScenarioSpec,
    adapter_spec: AdapterSpec,
    metric_specs: Vec<MetricSpec>,
    data_augmenter_spec: DataAugmenterSpec,
    groups: Vec<String>,
}

/// Raw input fields for a [`RunSpec`], before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpecFields {
    pub name: String,
    pub scenario_spec: ScenarioSpec,
    pub adapter_spec: AdapterSpec,
    pub metric_specs: Vec<MetricSpec>,
    #[serde(default)]
    pub data_augmenter_spec: DataAugmenterSpec,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl TryFrom<RunSpecFields> for RunSpec {
    type Error = InvalidRunName;

    fn try_from(fields: RunSpecFields) -> Result<Self, Self::Error> {
        Ok(Self {
            name: normalize_run_name(&fields.name)?,
            scenario_spec: fields.scenario_spec,
            adapter_spec: fields.adapter_spec,
            metric_specs: fields.metric_specs,
            data_augmenter_spec: fields.data_augmenter_spec,
            groups: fields.groups,
        })
    }
}

impl RunSpec {
    /// Create a run spec with a normalized name, default augmentation and no groups.
    pub fn new(
        name: impl AsRef<str>,
        scenario_spec: ScenarioSpec,
        adapter_spec: AdapterSpec,
        metric_specs: Vec<MetricSpec>,
    ) -> Result<Self, InvalidRunName> {
        RunSpecFields {
            name: name.as_ref().to_string(),
            scenario_spec,
            adapter_spec,
            metric_specs,
            data_augmenter_spec: DataAugmenterSpec::default(),
            groups: Vec::new(),
        }
        .try_into()
    }

    /// Replace the data augmenter.
    pub fn with_data_augmenter(mut self, spec: DataAugmenterSpec) -> Self {
        self.data_augmenter_spec = spec;
        self
    }

    /// Set the groups this run is aggregated under.
    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scenario_spec(&self) -> &ScenarioSpec {
        &self.scenario_spec
    }

    pub fn adapter_spec(&self) -> &AdapterSpec {
        &self.adapter_spec
    }

    pub fn metric_specs(&self) -> &[MetricSpec] {
        &self.metric_specs
    }

    pub fn data_augmenter_spec(&self) -> &DataAugmenterSpec {
        &self.data_augmenter_spec
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

/// Make a run name safe to use as a single path component.
///
/// Leading dots are reserved for staging directories, which also rules out
/// `.` and `..`.
fn normalize_run_name(name: &str) -> Result<String, InvalidRunName> {
    let normalized = name.replace(['/', '\\'], "_");
    let reason = if normalized.trim().is_empty() {
        Some("name is empty")
    } else if normalized.starts_with('.') {
        Some("name must not start with '.'")
    } else if normalized == EVAL_CACHE_DIR {
        Some("name is reserved for the eval cache")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(InvalidRunName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(normalized),
    }
}
