//! Custom Resource Definitions for Kiln
//!
//! Every repository entity has a namespaced custom resource mirror. All of
//! them share the `EntityStatus` subresource.

mod batch;
mod deployment;
mod packaging;
mod resource;
mod status;
mod training;
mod types;

pub use batch::{BatchInferenceJob, BatchInferenceJobSpec};
pub use deployment::{ModelDeployment, ModelDeploymentSpec};
pub use packaging::{ModelPackaging, ModelPackagingSpec};
pub use resource::{entity_labels, DomainResource, EntityKind, JobResource, DEFAULT_RUN_TIMEOUT};
pub use status::{EntityState, EntityStatus};
pub use training::{ModelTraining, ModelTrainingSpec};
pub use types::{
    resource_params, ConnectionRef, DataBinding, ModelIdentity, PackagingTarget, ResourceQuantity,
    ResourceRequirements,
};
