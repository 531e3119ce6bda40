//! ModelTraining CRD types
//!
//! A training run executes a toolchain entrypoint against bound data and
//! produces a model artifact. The artifact coordinates are reported back
//! through the result store and land in `status.results`.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource::{domain_resource, EntityKind, JobResource, DEFAULT_RUN_TIMEOUT};
use super::status::EntityStatus;
use super::types::{resource_params, DataBinding, ModelIdentity, ResourceRequirements};

/// Model training specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "ModelTraining",
    plural = "modeltrainings",
    shortname = "mt",
    namespaced,
    status = "EntityStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelTrainingSpec {
    /// Model being trained
    pub model: ModelIdentity,

    /// Training toolchain integration (e.g. "mlflow")
    pub toolchain: String,

    /// Entrypoint inside the model project
    pub entrypoint: String,

    /// Hyperparameters passed to the entrypoint
    #[serde(default)]
    pub hyper_parameters: BTreeMap<String, String>,

    /// Extra entrypoint arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Training image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Working directory inside the model project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,

    /// Data bound into the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataBinding>,

    /// Compute resources for the training container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Absolute timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

domain_resource!(ModelTraining, ModelTrainingSpec, EntityKind::Training);

impl JobResource for ModelTraining {
    fn task_name(&self) -> String {
        format!("{}-{}", EntityKind::Training.label(), self.spec.toolchain)
    }

    fn run_params(&self) -> BTreeMap<String, String> {
        let mut params = resource_params(self.spec.resources.as_ref());
        params.insert("model-name".into(), self.spec.model.name.clone());
        params.insert("model-version".into(), self.spec.model.version.clone());
        params.insert("entrypoint".into(), self.spec.entrypoint.clone());
        if let Some(template) = &self.spec.model.artifact_name_template {
            params.insert("artifact-name-template".into(), template.clone());
        }
        if let Some(image) = &self.spec.image {
            params.insert("image".into(), image.clone());
        }
        if let Some(dir) = &self.spec.work_dir {
            params.insert("work-dir".into(), dir.clone());
        }
        if !self.spec.args.is_empty() {
            params.insert("args".into(), self.spec.args.join(" "));
        }
        for (key, value) in &self.spec.hyper_parameters {
            params.insert(format!("hp-{key}"), value.clone());
        }
        for binding in &self.spec.data {
            params.insert(
                format!("data-{}", binding.local_path.trim_matches('/').replace('/', "-")),
                match &binding.source.path {
                    Some(path) => format!("{}:{}", binding.source.connection, path),
                    None => binding.source.connection.clone(),
                },
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConnectionRef, DomainResource, EntityState};

    fn sample_spec() -> ModelTrainingSpec {
        ModelTrainingSpec {
            model: ModelIdentity {
                name: "wine".into(),
                version: "1.0".into(),
                artifact_name_template: None,
            },
            toolchain: "mlflow".into(),
            entrypoint: "main".into(),
            hyper_parameters: BTreeMap::from([("alpha".to_string(), "0.5".to_string())]),
            data: vec![DataBinding {
                local_path: "data/wine/".into(),
                source: ConnectionRef {
                    connection: "wine-bucket".into(),
                    path: Some("/wine.csv".into()),
                },
            }],
            ..Default::default()
        }
    }

    #[test]
    fn build_sets_namespace_and_labels() {
        let obj = ModelTraining::build("wine-1", "kiln-training", sample_spec());
        assert_eq!(obj.entity_id(), "wine-1");
        assert_eq!(obj.metadata.namespace.as_deref(), Some("kiln-training"));
        assert_eq!(
            obj.metadata.labels.as_ref().unwrap()[crate::ENTITY_KIND_LABEL],
            "training"
        );
        assert_eq!(obj.current_state(), EntityState::Unset);
        assert!(!obj.is_deleting());
    }

    #[test]
    fn task_name_uses_toolchain() {
        let obj = ModelTraining::build("wine-1", "ns", sample_spec());
        assert_eq!(obj.task_name(), "training-mlflow");
    }

    #[test]
    fn run_params_include_model_and_hyperparameters() {
        let obj = ModelTraining::build("wine-1", "ns", sample_spec());
        let params = obj.run_params();
        assert_eq!(params["model-name"], "wine");
        assert_eq!(params["hp-alpha"], "0.5");
        assert_eq!(params["data-data-wine"], "wine-bucket:/wine.csv");
        assert!(!params.contains_key("image"));
    }

    #[test]
    fn timeout_defaults_when_unset() {
        let mut obj = ModelTraining::build("wine-1", "ns", sample_spec());
        assert_eq!(obj.run_timeout(), DEFAULT_RUN_TIMEOUT);
        obj.spec.timeout_seconds = Some(60);
        assert_eq!(obj.run_timeout(), Duration::from_secs(60));
    }
}
