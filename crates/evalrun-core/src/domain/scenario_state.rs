//! The full set of request states for a run.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::instance::Instance;
use super::request::RequestState;
use super::spec::AdapterSpec;

/// All request states of a run plus the adapter spec that produced them.
///
/// Produced by the adapter, filled in by the executor and read by metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioState {
    pub adapter_spec: AdapterSpec,
    pub request_states: Vec<RequestState>,
}

impl ScenarioState {
    pub fn new(adapter_spec: AdapterSpec, request_states: Vec<RequestState>) -> Self {
        Self {
            adapter_spec,
            request_states,
        }
    }

    /// Distinct instances in order of first appearance.
    pub fn instances(&self) -> Vec<&Instance> {
        let mut seen = HashSet::new();
        self.request_states
            .iter()
            .map(|state| &state.instance)
            .filter(|instance| seen.insert(*instance))
            .collect()
    }

    /// Every request state for `(train_trial_index, instance, reference_index)`.
    ///
    /// Scans all request states; use [`ScenarioState::index`] when looking up
    /// many instances.
    pub fn get_request_states<'a>(
        &'a self,
        train_trial_index: usize,
        instance: &'a Instance,
        reference_index: Option<usize>,
    ) -> impl Iterator<Item = &'a RequestState> + 'a {
        self.request_states.iter().filter(move |state| {
            state.train_trial_index == train_trial_index
                && state.reference_index == reference_index
                && state.instance == *instance
        })
    }

    /// Build a lookup index over the current request states.
    pub fn index(&self) -> RequestIndex<'_> {
        RequestIndex::new(&self.request_states)
    }

    pub fn len(&self) -> usize {
        self.request_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.request_states.is_empty()
    }
}

type RequestKey<'a> = (usize, Option<usize>, &'a Instance);

/// Hash index over request states keyed by `(trial, reference, instance)`.
///
/// Built in one pass; lookups cost one hash of the instance instead of a
/// scan over every request state.
pub struct RequestIndex<'a> {
    request_states: &'a [RequestState],
    instances: Vec<&'a Instance>,
    by_key: HashMap<RequestKey<'a>, Vec<usize>>,
}

impl<'a> RequestIndex<'a> {
    pub fn new(request_states: &'a [RequestState]) -> Self {
        let mut instances = Vec::new();
        let mut seen = HashSet::new();
        let mut by_key: HashMap<RequestKey<'a>, Vec<usize>> = HashMap::new();
        for (position, state) in request_states.iter().enumerate() {
            if seen.insert(&state.instance) {
                instances.push(&state.instance);
            }
            by_key
                .entry((state.train_trial_index, state.reference_index, &state.instance))
                .or_default()
                .push(position);
        }
        Self {
            request_states,
            instances,
            by_key,
        }
    }

    /// Distinct instances in order of first appearance.
    pub fn instances(&self) -> &[&'a Instance] {
        &self.instances
    }

    /// Request states for `(train_trial_index, instance, reference_index)`,
    /// in their original order.
    pub fn request_states(
        &self,
        train_trial_index: usize,
        instance: &'a Instance,
        reference_index: Option<usize>,
    ) -> impl Iterator<Item = &'a RequestState> + '_ {
        let request_states = self.request_states;
        self.by_key
            .get(&(train_trial_index, reference_index, instance))
            .into_iter()
            .flatten()
            .map(move |&position| &request_states[position])
    }
}
