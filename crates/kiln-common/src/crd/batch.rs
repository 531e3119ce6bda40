//! BatchInferenceJob CRD types

use std::collections::BTreeMap;
use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource::{domain_resource, EntityKind, JobResource, DEFAULT_RUN_TIMEOUT};
use super::status::EntityStatus;
use super::types::{resource_params, ConnectionRef, ResourceRequirements};

/// Batch inference job specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "BatchInferenceJob",
    plural = "batchinferencejobs",
    shortname = "bij",
    namespaced,
    status = "EntityStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BatchInferenceJobSpec {
    /// Inference service whose predictor runs the batch
    pub inference_service_id: String,

    /// Input data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<ConnectionRef>,

    /// Where predictions are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_destination: Option<ConnectionRef>,

    /// Model files, when not baked into the predictor image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_source: Option<ConnectionRef>,

    /// Node selector for the job pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Compute resources for the predictor container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Absolute timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

domain_resource!(BatchInferenceJob, BatchInferenceJobSpec, EntityKind::BatchJob);

fn connection_param(conn: &ConnectionRef) -> String {
    match &conn.path {
        Some(path) => format!("{}:{}", conn.connection, path),
        None => conn.connection.clone(),
    }
}

impl JobResource for BatchInferenceJob {
    fn task_name(&self) -> String {
        format!("{}-inference", EntityKind::BatchJob.label())
    }

    fn run_params(&self) -> BTreeMap<String, String> {
        let mut params = resource_params(self.spec.resources.as_ref());
        params.insert(
            "inference-service".into(),
            self.spec.inference_service_id.clone(),
        );
        for (name, conn) in [
            ("data-source", &self.spec.data_source),
            ("output-destination", &self.spec.output_destination),
            ("model-source", &self.spec.model_source),
        ] {
            if let Some(conn) = conn {
                params.insert(name.into(), connection_param(conn));
            }
        }
        for (key, value) in &self.spec.node_selector {
            params.insert(format!("node-selector-{key}"), value.clone());
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
