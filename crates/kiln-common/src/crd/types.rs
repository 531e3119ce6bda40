//! Supporting types shared by the domain CRD specs

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name and version of the model an entity works on
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelIdentity {
    /// Model name
    pub name: String,
    /// Model version
    pub version: String,
    /// Template for the produced artifact name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_name_template: Option<String>,
}

/// Compute resource quantities (Kubernetes quantity strings)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantity {
    /// CPU quantity (e.g. "500m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity (e.g. "1Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// GPU count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
}

/// Requests and limits for the job container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Guaranteed resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantity>,
    /// Resource ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantity>,
}

/// Reference to data behind a named connection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRef {
    /// Connection name
    pub connection: String,
    /// Path inside the connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Data made available to a training run
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataBinding {
    /// Where the run sees the data
    pub local_path: String,
    /// Where the data comes from
    pub source: ConnectionRef,
}

/// Destination for a packaged artifact
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackagingTarget {
    /// Target name as declared by the packaging integration
    pub name: String,
    /// Connection receiving the artifact
    pub connection_name: String,
}

/// Render `resources` as Run parameters, skipping unset quantities
pub fn resource_params(resources: Option<&ResourceRequirements>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let Some(resources) = resources else {
        return params;
    };
    for (prefix, quantity) in [
        ("requests", resources.requests.as_ref()),
        ("limits", resources.limits.as_ref()),
    ] {
        let Some(q) = quantity else { continue };
        for (name, value) in [("cpu", &q.cpu), ("memory", &q.memory), ("gpu", &q.gpu)] {
            if let Some(v) = value {
                params.insert(format!("{prefix}-{name}"), v.clone());
            }
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_params_skip_unset_quantities() {
        let resources = ResourceRequirements {
            requests: Some(ResourceQuantity {
                cpu: Some("500m".into()),
                memory: None,
                gpu: None,
            }),
            limits: Some(ResourceQuantity {
                cpu: None,
                memory: Some("2Gi".into()),
                gpu: Some("1".into()),
            }),
        };
        let params = resource_params(Some(&resources));
        assert_eq!(params.len(), 3);
        assert_eq!(params["requests-cpu"], "500m");
        assert_eq!(params["limits-memory"], "2Gi");
        assert_eq!(params["limits-gpu"], "1");
    }

    #[test]
    fn resource_params_empty_without_resources() {
        assert!(resource_params(None).is_empty());
    }

    #[test]
    fn connection_ref_omits_missing_path() {
        let r = ConnectionRef {
            connection: "s3-models".into(),
            path: None,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json, serde_json::json!({"connection": "s3-models"}));
    }
}
