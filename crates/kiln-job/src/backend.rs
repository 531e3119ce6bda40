//! Execution backend: Runs, their pods, and the result side-channel
//!
//! Runs are Tekton `TaskRun`s handled as dynamic objects, so the operator
//! does not need Tekton's Rust types. Each Run is owned by its entity's
//! cluster object; deleting the entity cascades to the Run, its pod and the
//! result ConfigMap.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, DynamicObject, ObjectMeta, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use kiln_common::{Error, Result};

use crate::run::RunRequest;
use crate::state::{PodObservation, PodPhase, RunCondition, RunObservation};

const RUN_GROUP: &str = "tekton.dev";
const RUN_VERSION: &str = "v1";
const RUN_KIND: &str = "TaskRun";
const RUN_PLURAL: &str = "taskruns";

/// Operations the status controller needs from the execution backend
///
/// Getters return `None` for absent objects.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Observe a Run
    async fn get_run(&self, namespace: &str, name: &str) -> Result<Option<RunObservation>>;

    /// Dispatch a Run
    async fn create_run(&self, request: &RunRequest) -> Result<()>;

    /// Delete a Run and, through owner references, its pod
    async fn delete_run(&self, namespace: &str, name: &str) -> Result<()>;

    /// Observe a pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodObservation>>;

    /// Make sure the result ConfigMap exists before the Run can write to it
    async fn ensure_result_store(
        &self,
        namespace: &str,
        name: &str,
        owner: &OwnerReference,
    ) -> Result<()>;

    /// Read the key/value results the Run wrote; empty when nothing was written
    async fn read_results(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;
}

/// API resource of a Run
pub fn run_api_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(RUN_GROUP, RUN_VERSION, RUN_KIND),
        RUN_PLURAL,
    )
}

/// Build the TaskRun object for a request
pub fn build_task_run(request: &RunRequest) -> DynamicObject {
    let params: Vec<_> = request
        .params
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut obj = DynamicObject::new(&request.name, &run_api_resource())
        .within(&request.namespace)
        .data(json!({
            "spec": {
                "taskRef": { "name": request.task },
                "params": params,
                "timeout": request.timeout_string(),
            }
        }));
    obj.metadata.labels = Some(request.labels.clone());
    obj.metadata.owner_references = Some(vec![request.owner.clone()]);
    obj
}

/// Extract conditions and pod name from a TaskRun's JSON body
pub fn parse_run_status(data: &serde_json::Value) -> Result<RunObservation> {
    let status = &data["status"];
    let conditions = match status.get("conditions") {
        Some(raw) => serde_json::from_value::<Vec<RunCondition>>(raw.clone())
            .map_err(|e| Error::serialization_for_kind(RUN_KIND, format!("conditions: {e}")))?,
        None => Vec::new(),
    };
    let pod_name = status
        .get("podName")
        .and_then(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    Ok(RunObservation {
        conditions,
        pod_name,
    })
}

/// Reduce a Pod to the fields the state machine reads
pub fn observe_pod(pod: &Pod) -> PodObservation {
    let status = pod.status.as_ref();
    let exit_code = status
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .find_map(|cs| cs.state.as_ref()?.terminated.as_ref().map(|t| t.exit_code));
    PodObservation {
        phase: status
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::parse)
            .unwrap_or_default(),
        reason: status.and_then(|s| s.reason.clone()),
        message: status.and_then(|s| s.message.clone()),
        exit_code,
    }
}

/// [`ExecutionBackend`] backed by Tekton and the Kubernetes API
pub struct KubeExecutionBackend {
    client: Client,
}

impl KubeExecutionBackend {
    /// Create a backend using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn runs(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &run_api_resource())
    }
}

#[async_trait]
impl ExecutionBackend for KubeExecutionBackend {
    async fn get_run(&self, namespace: &str, name: &str) -> Result<Option<RunObservation>> {
        match self.runs(namespace).get_opt(name).await {
            Ok(Some(obj)) => parse_run_status(&obj.data).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::from_kube(RUN_KIND, name, e)),
        }
    }

    async fn create_run(&self, request: &RunRequest) -> Result<()> {
        let obj = build_task_run(request);
        self.runs(&request.namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_kube(RUN_KIND, request.name.as_str(), e))?;
        info!(run = %request.name, task = %request.task, "Dispatched run");
        Ok(())
    }

    async fn delete_run(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .runs(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match Error::from_kube(RUN_KIND, name, e) {
                Error::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodObservation>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match pods.get_opt(name).await {
            Ok(pod) => Ok(pod.as_ref().map(observe_pod)),
            Err(e) => Err(Error::from_kube("Pod", name, e)),
        }
    }

    async fn ensure_result_store(
        &self,
        namespace: &str,
        name: &str,
        owner: &OwnerReference,
    ) -> Result<()> {
        let cms: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        if cms
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube("ConfigMap", name, e))?
            .is_some()
        {
            return Ok(());
        }
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: Some(vec![owner.clone()]),
                ..Default::default()
            },
            ..Default::default()
        };
        match cms.create(&PostParams::default(), &cm).await {
            Ok(_) => {
                debug!(configmap = %name, "Created result store");
                Ok(())
            }
            Err(e) => match Error::from_kube("ConfigMap", name, e) {
                Error::AlreadyExists { .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn read_results(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let cms: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = cms
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube("ConfigMap", name, e))?;
        Ok(cm.and_then(|cm| cm.data).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus,
    };
    use std::time::Duration;

    fn request() -> RunRequest {
        RunRequest {
            name: "wine-1".into(),
            namespace: "kiln-training".into(),
            task: "training-mlflow".into(),
            params: BTreeMap::from([
                ("entrypoint".to_string(), "main".to_string()),
                ("model-name".to_string(), "wine".to_string()),
            ]),
            timeout: Duration::from_secs(3600),
            labels: BTreeMap::from([("kiln.dev/entity-id".to_string(), "wine-1".to_string())]),
            owner: OwnerReference {
                api_version: "kiln.dev/v1alpha1".into(),
                kind: "ModelTraining".into(),
                name: "wine-1".into(),
                uid: "uid-1".into(),
                controller: Some(true),
                ..Default::default()
            },
        }
    }

    #[test]
    fn task_run_references_task_and_owner() {
        let obj = build_task_run(&request());
        assert_eq!(obj.metadata.name.as_deref(), Some("wine-1"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("kiln-training"));
        let types = obj.types.as_ref().unwrap();
        assert_eq!(types.api_version, "tekton.dev/v1");
        assert_eq!(types.kind, "TaskRun");
        assert_eq!(obj.data["spec"]["taskRef"]["name"], "training-mlflow");
        assert_eq!(obj.data["spec"]["timeout"], "3600s");
        assert_eq!(obj.data["spec"]["params"][0]["name"], "entrypoint");
        assert_eq!(obj.metadata.owner_references.unwrap()[0].uid, "uid-1");
    }

    #[test]
    fn run_status_is_parsed_from_conditions() {
        let data = json!({
            "status": {
                "podName": "wine-1-pod",
                "conditions": [{
                    "type": "Succeeded",
                    "status": "True",
                    "reason": "exit code 0",
                    "message": "Emulated success"
                }]
            }
        });
        let run = parse_run_status(&data).unwrap();
        assert_eq!(run.pod_name.as_deref(), Some("wine-1-pod"));
        let last = run.last_condition().unwrap();
        assert_eq!(last.status, crate::state::ConditionStatus::True);
        assert_eq!(last.message.as_deref(), Some("Emulated success"));
    }

    #[test]
    fn fresh_run_has_no_conditions() {
        let run = parse_run_status(&json!({ "spec": {} })).unwrap();
        assert!(run.conditions.is_empty());
        assert!(run.pod_name.is_none());
    }

    #[test]
    fn malformed_condition_is_a_serialization_error() {
        let data = json!({ "status": { "conditions": [{ "status": "Maybe" }] } });
        assert!(matches!(
            parse_run_status(&data),
            Err(Error::Serialization { .. })
        ));
    }

    #[test]
    fn pod_observation_carries_eviction_and_exit_code() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Failed".into()),
                reason: Some("Evicted".into()),
                message: Some("Pod was evicted".into()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "step-train".into(),
                    state: Some(ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code: 137,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let observed = observe_pod(&pod);
        assert_eq!(observed.phase, PodPhase::Failed);
        assert_eq!(observed.reason.as_deref(), Some("Evicted"));
        assert_eq!(observed.exit_code, Some(137));
    }

    #[test]
    fn pod_without_status_is_unknown() {
        assert_eq!(observe_pod(&Pod::default()), PodObservation::default());
    }
}
