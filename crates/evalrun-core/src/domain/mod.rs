//! Domain models for evalrun.
//!
//! Canonical definitions for the core entities:
//! - `RunSpec`: Immutable description of one run
//! - `Instance` / `Reference`: Evaluation examples and accepted answers
//! - `RequestState`: An instance paired with its model request and result
//! - `ScenarioState`: Every request state of a run

pub mod error;
pub mod instance;
pub mod request;
pub mod run_spec;
pub mod scenario_state;
pub mod spec;

pub use error::{EvalError, Result};
pub use instance::{with_instance_ids, Instance, Reference, CORRECT_TAG};
pub use request::{Completion, Request, RequestResult, RequestState, Token};
pub use run_spec::{InvalidRunName, RunSpec, RunSpecFields, EVAL_CACHE_DIR};
pub use scenario_state::{RequestIndex, ScenarioState};
pub use spec::{
    AdapterSpec, DataAugmenterSpec, MetricSpec, ObjectSpec, PerturbationSpec, ScenarioSpec,
};
