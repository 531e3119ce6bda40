//! Capabilities shared by the domain custom resources
//!
//! The sync engine and the status controllers are written once against these
//! traits. Each CRD opts in with `domain_resource!` and, when it is backed by
//! a Run, with a hand-written `JobResource` impl.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::status::{EntityState, EntityStatus};

/// Default absolute wall-clock limit for a Run
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// The four kinds of entity managed by Kiln
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Model training
    Training,
    /// Model packaging
    Packaging,
    /// Model deployment
    Deployment,
    /// Batch inference
    BatchJob,
}

impl EntityKind {
    /// Custom resource kind name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "ModelTraining",
            Self::Packaging => "ModelPackaging",
            Self::Deployment => "ModelDeployment",
            Self::BatchJob => "BatchInferenceJob",
        }
    }

    /// Short lowercase label used in object names and label values
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Packaging => "packaging",
            Self::Deployment => "deployment",
            Self::BatchJob => "batch",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespaced Kiln custom resource mirroring a repository record
pub trait DomainResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// User-supplied desired state
    type Spec: Clone + std::fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Which entity kind this resource represents
    const KIND: EntityKind;

    /// Build a fresh cluster object for a record
    fn build(id: &str, namespace: &str, spec: Self::Spec) -> Self;

    /// Desired state
    fn entity_spec(&self) -> &Self::Spec;

    /// Replace the desired state
    fn set_entity_spec(&mut self, spec: Self::Spec);

    /// Observed status, if the controller has written one
    fn entity_status(&self) -> Option<&EntityStatus>;

    /// Replace the observed status
    fn set_entity_status(&mut self, status: Option<EntityStatus>);

    /// Entity ID (the object name)
    fn entity_id(&self) -> String {
        self.meta().name.clone().unwrap_or_default()
    }

    /// Whether deletion of this object is already in flight
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Current lifecycle state, `Unset` when no status was written
    fn current_state(&self) -> EntityState {
        self.entity_status().map(|s| s.state).unwrap_or_default()
    }
}

/// A domain resource whose work is performed by a Run
pub trait JobResource: DomainResource {
    /// Name of the task the Run references
    fn task_name(&self) -> String;

    /// Parameters passed to the Run
    fn run_params(&self) -> BTreeMap<String, String>;

    /// Absolute wall-clock limit for the Run
    fn run_timeout(&self) -> Duration;
}

/// Standard labels identifying the entity behind an object
pub fn entity_labels(kind: EntityKind, id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (crate::ENTITY_ID_LABEL.to_string(), id.to_string()),
        (crate::ENTITY_KIND_LABEL.to_string(), kind.label().to_string()),
    ])
}

/// Implement [`DomainResource`] for a `#[derive(CustomResource)]` type whose
/// status is `EntityStatus`.
macro_rules! domain_resource {
    ($ty:ty, $spec:ty, $kind:expr) => {
        impl $crate::crd::DomainResource for $ty {
            type Spec = $spec;

            const KIND: $crate::crd::EntityKind = $kind;

            fn build(id: &str, namespace: &str, spec: Self::Spec) -> Self {
                let mut obj = <$ty>::new(id, spec);
                obj.metadata.namespace = Some(namespace.to_string());
                obj.metadata.labels = Some($crate::crd::entity_labels($kind, id));
                obj
            }

            fn entity_spec(&self) -> &Self::Spec {
                &self.spec
            }

            fn set_entity_spec(&mut self, spec: Self::Spec) {
                self.spec = spec;
            }

            fn entity_status(&self) -> Option<&$crate::crd::EntityStatus> {
                self.status.as_ref()
            }

            fn set_entity_status(&mut self, status: Option<$crate::crd::EntityStatus>) {
                self.status = status;
            }
        }
    };
}

pub(crate) use domain_resource;
