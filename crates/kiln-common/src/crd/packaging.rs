//! ModelPackaging CRD types
//!
//! Packaging turns a trained artifact into a deployable image (or another
//! distributable form) using a packaging integration.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource::{domain_resource, EntityKind, JobResource, DEFAULT_RUN_TIMEOUT};
use super::status::EntityStatus;
use super::types::{resource_params, PackagingTarget, ResourceRequirements};

/// Model packaging specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "ModelPackaging",
    plural = "modelpackagings",
    shortname = "mp",
    namespaced,
    status = "EntityStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelPackagingSpec {
    /// Trained artifact to package
    pub artifact_name: String,

    /// Packaging integration (e.g. "docker-rest")
    pub integration_name: String,

    /// Packager image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Integration-specific arguments
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,

    /// Where the packaged result is pushed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<PackagingTarget>,

    /// Compute resources for the packager container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Absolute timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

domain_resource!(ModelPackaging, ModelPackagingSpec, EntityKind::Packaging);

impl JobResource for ModelPackaging {
    fn task_name(&self) -> String {
        format!(
            "{}-{}",
            EntityKind::Packaging.label(),
            self.spec.integration_name
        )
    }

    fn run_params(&self) -> BTreeMap<String, String> {
        let mut params = resource_params(self.spec.resources.as_ref());
        params.insert("artifact-name".into(), self.spec.artifact_name.clone());
        if let Some(image) = &self.spec.image {
            params.insert("image".into(), image.clone());
        }
        for (key, value) in &self.spec.arguments {
            params.insert(format!("arg-{key}"), value.clone());
        }
        for target in &self.spec.targets {
            params.insert(
                format!("target-{}", target.name),
                target.connection_name.clone(),
            );
        }
        params
    }

    fn run_timeout(&self) -> Duration {
        self.spec
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RUN_TIMEOUT)
    }
}
