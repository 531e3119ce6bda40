//! Run requests built from job entities

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use kiln_common::crd::{entity_labels, JobResource};
use kiln_common::{Error, Result};

/// Parameter carrying the name of the result ConfigMap
pub const RESULT_STORE_PARAM: &str = "result-config-map";

/// Name of the ConfigMap a Run's final step writes its results to
pub fn result_store_name(entity_id: &str) -> String {
    format!("{entity_id}-result")
}

/// Everything the execution backend needs to dispatch a Run
#[derive(Clone, Debug, PartialEq)]
pub struct RunRequest {
    /// Run name, equal to the entity ID
    pub name: String,
    /// Namespace of the entity
    pub namespace: String,
    /// Task the Run executes
    pub task: String,
    /// Task parameters
    pub params: BTreeMap<String, String>,
    /// Absolute wall-clock limit
    pub timeout: Duration,
    /// Labels identifying the entity
    pub labels: BTreeMap<String, String>,
    /// Controller reference to the entity's cluster object
    pub owner: OwnerReference,
}

impl RunRequest {
    /// Build the Run for a job entity
    pub fn for_resource<K: JobResource>(obj: &K) -> Result<Self> {
        let name = obj.entity_id();
        let namespace = obj.meta().namespace.clone().ok_or_else(|| {
            Error::internal_with_context("RunRequest", format!("{} {name} has no namespace", K::KIND))
        })?;
        let owner = obj.controller_owner_ref(&()).ok_or_else(|| {
            Error::internal_with_context("RunRequest", format!("{} {name} has no uid", K::KIND))
        })?;

        let mut params = obj.run_params();
        params.insert(RESULT_STORE_PARAM.to_string(), result_store_name(&name));

        Ok(Self {
            labels: entity_labels(K::KIND, &name),
            task: obj.task_name(),
            timeout: obj.run_timeout(),
            name,
            namespace,
            params,
            owner,
        })
    }

    /// Timeout in the Go duration format the backend expects
    pub fn timeout_string(&self) -> String {
        format!("{}s", self.timeout.as_secs())
    }
}
