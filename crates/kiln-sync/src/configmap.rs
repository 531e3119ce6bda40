//! Repository backend using the cluster API as plain storage
//!
//! Each record is one ConfigMap named `kiln-<kind>-<id>`, labelled with the
//! record kind and entity ID. Spec and status are stored as JSON documents.
//! Status reports patch only the `status` key, guarded by the
//! resourceVersion they read.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use kiln_common::crd::{EntityKind, EntityStatus};
use kiln_common::retry::{retry_on_conflict, RetryConfig};
use kiln_common::{Error, Result, ENTITY_ID_LABEL};

use crate::repository::{ListQuery, Listing, Record, Repository};

/// Label selecting the ConfigMaps that back one record kind
pub const RECORD_KIND_LABEL: &str = "kiln.dev/record-kind";

const SPEC_KEY: &str = "spec";
const STATUS_KEY: &str = "status";
const DELETION_MARK_KEY: &str = "deletionMark";

/// Repository of records stored as ConfigMaps in one namespace
pub struct ConfigMapRepository<S> {
    api: Api<ConfigMap>,
    kind: EntityKind,
    _spec: PhantomData<fn() -> S>,
}

impl<S> ConfigMapRepository<S> {
    /// Create a repository for `kind` records in `namespace`
    pub fn new(client: Client, namespace: &str, kind: EntityKind) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            kind,
            _spec: PhantomData,
        }
    }

    fn selector(&self) -> String {
        format!("{}={}", RECORD_KIND_LABEL, self.kind.label())
    }
}

/// Name of the ConfigMap holding a record
pub fn configmap_name(kind: EntityKind, id: &str) -> String {
    format!("kiln-{}-{}", kind.label(), id)
}

/// Encode a record as the data of its ConfigMap
pub fn encode_record<S: Serialize>(kind: EntityKind, record: &Record<S>) -> Result<ConfigMap> {
    let data = BTreeMap::from([
        (SPEC_KEY.to_string(), to_json(kind, &record.spec)?),
        (STATUS_KEY.to_string(), to_json(kind, &record.status)?),
        (DELETION_MARK_KEY.to_string(), record.deletion_mark.to_string()),
    ]);
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(configmap_name(kind, &record.id)),
            labels: Some(BTreeMap::from([
                (RECORD_KIND_LABEL.to_string(), kind.label().to_string()),
                (ENTITY_ID_LABEL.to_string(), record.id.clone()),
            ])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Entity ID of a record ConfigMap, from its label or else its name
fn record_id(kind: EntityKind, cm: &ConfigMap) -> Option<String> {
    let labelled = cm
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(ENTITY_ID_LABEL))
        .cloned();
    labelled.or_else(|| {
        let prefix = format!("kiln-{}-", kind.label());
        cm.metadata
            .name
            .as_deref()
            .and_then(|name| name.strip_prefix(prefix.as_str()))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    })
}

/// Decode a record from its ConfigMap
pub fn decode_record<S: DeserializeOwned>(kind: EntityKind, cm: &ConfigMap) -> Result<Record<S>> {
    let id = record_id(kind, cm).ok_or_else(|| {
        Error::serialization_for_kind(kind.as_str(), "record ConfigMap has no entity ID")
    })?;
    let data = cm.data.as_ref();
    let field = |key: &str| data.and_then(|d| d.get(key)).map(String::as_str);

    let spec = field(SPEC_KEY).ok_or_else(|| {
        Error::serialization_for_kind(kind.as_str(), format!("record {id} has no spec"))
    })?;
    let spec = serde_json::from_str(spec).map_err(|e| {
        Error::serialization_for_kind(kind.as_str(), format!("record {id} spec: {e}"))
    })?;
    let status = match field(STATUS_KEY) {
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            Error::serialization_for_kind(kind.as_str(), format!("record {id} status: {e}"))
        })?,
        None => Default::default(),
    };
    let deletion_mark = field(DELETION_MARK_KEY) == Some("true");

    Ok(Record {
        id,
        spec,
        status,
        deletion_mark,
    })
}

fn to_json<T: Serialize>(kind: EntityKind, value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string()))
}

#[async_trait]
impl<S> Repository<S> for ConfigMapRepository<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> Result<Option<Record<S>>> {
        let name = configmap_name(self.kind, id);
        match self.api.get_opt(&name).await {
            Ok(Some(cm)) => decode_record(self.kind, &cm).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::from_kube(self.kind.as_str(), id, e)),
        }
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<Record<S>>> {
        let cms = self
            .api
            .list(&ListParams::default().labels(&self.selector()))
            .await?;

        let mut records = Vec::with_capacity(cms.items.len());
        let mut unreadable = Vec::new();
        for cm in &cms.items {
            match decode_record(self.kind, cm) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let configmap = cm.metadata.name.as_deref().unwrap_or_default();
                    warn!(kind = %self.kind, configmap, error = %e, "Skipping unreadable record");
                    unreadable.extend(record_id(self.kind, cm));
                }
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        unreadable.sort();

        Ok(Listing {
            items: query.apply(records),
            unreadable,
        })
    }

    async fn create(&self, record: Record<S>) -> Result<()> {
        let cm = encode_record(self.kind, &record)?;
        self.api
            .create(&PostParams::default(), &cm)
            .await
            .map_err(|e| Error::from_kube(self.kind.as_str(), &record.id, e))?;
        debug!(kind = %self.kind, id = %record.id, "Record created");
        Ok(())
    }

    async fn update(&self, record: Record<S>) -> Result<()> {
        let cm = encode_record(self.kind, &record)?;
        let patch = serde_json::json!({ "data": cm.data });
        self.api
            .patch(
                &configmap_name(self.kind, &record.id),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| Error::from_kube(self.kind.as_str(), &record.id, e))?;
        Ok(())
    }

    async fn update_status(&self, id: &str, status: &EntityStatus) -> Result<()> {
        let name = configmap_name(self.kind, id);
        let data = BTreeMap::from([(STATUS_KEY, to_json(self.kind, status)?)]);
        let (api, kind, name, data) = (&self.api, self.kind, &name, &data);

        retry_on_conflict(&RetryConfig::conflict(), "update_status", move || async move {
            let current = api
                .get_opt(name)
                .await
                .map_err(|e| Error::from_kube(kind.as_str(), id, e))?
                .ok_or_else(|| Error::not_found(kind.as_str(), id))?;
            let patch = serde_json::json!({
                "metadata": { "resourceVersion": current.metadata.resource_version },
                "data": data,
            });
            api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| Error::from_kube(kind.as_str(), id, e))?;
            Ok(())
        })
        .await?;
        debug!(kind = %self.kind, id, state = %status.state, "Record status updated");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.api
            .delete(&configmap_name(self.kind, id), &Default::default())
            .await
            .map_err(|e| Error::from_kube(self.kind.as_str(), id, e))?;
        debug!(kind = %self.kind, id, "Record deleted");
        Ok(())
    }
}
