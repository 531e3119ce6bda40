//! The operator installs its own CRDs on startup using server-side apply,
//! so the schema always matches the running version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use kiln_common::crd::{BatchInferenceJob, ModelDeployment, ModelPackaging, ModelTraining};
use kiln_common::FIELD_MANAGER;

/// CRD definition with name and resource
pub struct CrdDef {
    /// `<plural>.<group>`
    pub name: &'static str,
    /// The definition itself
    pub crd: CustomResourceDefinition,
}

/// Every CRD owned by Kiln
pub fn all_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "modeltrainings.kiln.dev",
            crd: ModelTraining::crd(),
        },
        CrdDef {
            name: "modelpackagings.kiln.dev",
            crd: ModelPackaging::crd(),
        },
        CrdDef {
            name: "modeldeployments.kiln.dev",
            crd: ModelDeployment::crd(),
        },
        CrdDef {
            name: "batchinferencejobs.kiln.dev",
            crd: BatchInferenceJob::crd(),
        },
    ]
}

/// Render every CRD as a multi-document YAML stream
pub fn crd_yaml() -> anyhow::Result<String> {
    let docs = all_crds()
        .iter()
        .map(|def| {
            serde_yaml::to_string(&def.crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}

/// Ensure every Kiln CRD is installed
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in all_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("All Kiln CRDs installed/updated");
    Ok(())
}
