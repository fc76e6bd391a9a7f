//! Evaluation instances and their references.

use serde::{Deserialize, Serialize};

/// Tag marking a reference as an accepted answer.
pub const CORRECT_TAG: &str = "correct";

/// A candidate answer with semantic tags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Reference {
    /// The answer text.
    pub output: String,

    /// Labels such as `correct`, `ambiguous` or `negative`.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Reference {
    pub fn new(output: impl Into<String>, tags: &[&str]) -> Self {
        Self {
            output: output.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_correct(&self) -> bool {
        self.has_tag(CORRECT_TAG)
    }
}

/// A single evaluation example.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Instance {
    pub input: String,

    pub references: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_split: Option<String>,

    /// Stable identifier, assigned by [`with_instance_ids`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the perturbation that produced this instance, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perturbation: Option<String>,
}

impl Instance {
    pub fn new(input: impl Into<String>, references: Vec<Reference>) -> Self {
        Self {
            input: input.into(),
            references,
            split: None,
            sub_split: None,
            id: None,
            perturbation: None,
        }
    }

    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = Some(split.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_perturbation(mut self, perturbation: impl Into<String>) -> Self {
        self.perturbation = Some(perturbation.into());
        self
    }

    /// Identifier used in logs and per-instance stats.
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<unassigned>")
    }

    /// References tagged as correct.
    pub fn correct_references(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter().filter(|r| r.is_correct())
    }
}

/// Assign positional IDs (`id0`, `id1`, ...). Existing IDs are overwritten.
pub fn with_instance_ids(instances: Vec<Instance>) -> Vec<Instance> {
    instances
        .into_iter()
        .enumerate()
        .map(|(i, instance)| instance.with_id(format!("id{}", i)))
        .collect()
}
