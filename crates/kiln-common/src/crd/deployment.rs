//! ModelDeployment CRD types
//!
//! Deployments are mirrored by the sync engine like every other entity. Their
//! serving resources are rendered and reconciled outside this workspace, which
//! writes the resulting status onto the object.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource::{domain_resource, EntityKind};
use super::status::EntityStatus;
use super::types::ResourceRequirements;

/// Model deployment specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "ModelDeployment",
    plural = "modeldeployments",
    shortname = "md",
    namespaced,
    status = "EntityStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelDeploymentSpec {
    /// Packaged model image
    pub image: String,

    /// Predictor protocol (e.g. "kfserving", "triton")
    pub predictor: String,

    /// Minimum number of replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,

    /// Maximum number of replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,

    /// Connection used to pull the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_connection: Option<String>,

    /// Role required to call the deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// Compute resources per replica
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

domain_resource!(ModelDeployment, ModelDeploymentSpec, EntityKind::Deployment);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DomainResource;

    #[test]
    fn deployment_roundtrips_through_build() {
        let spec = ModelDeploymentSpec {
            image: "registry/wine:1".into(),
            predictor: "kfserving".into(),
            min_replicas: Some(1),
            ..Default::default()
        };
        let obj = ModelDeployment::build("wine-dep", "kiln-deployment", spec.clone());
        assert_eq!(obj.entity_spec(), &spec);
        assert!(obj.entity_status().is_none());
    }
}
