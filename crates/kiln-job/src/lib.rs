//! Job execution for Kiln: dispatching Runs and deriving entity state
//!
//! The state machine in [`state`] is a pure function of what the execution
//! backend reports. [`controller`] wires it into a `kube::runtime`
//! reconcile loop for every run-backed entity kind.

#![deny(missing_docs)]

pub mod backend;
pub mod controller;
pub mod run;
pub mod state;

pub use backend::{ExecutionBackend, KubeExecutionBackend};
pub use controller::{
    error_policy, reconcile, reconcile_status, ControllerConfig, JobContext, KubeStatusPatcher,
    StatusPatcher,
};
pub use run::{result_store_name, RunRequest};
pub use state::{
    apply_derivation, derive_state, ConditionStatus, Derivation, PodObservation, PodPhase,
    RunCondition, RunObservation, EVICTED_REASON, POD_EVICTED_REASON,
};
