//! Binding of the capability traits to repositories and custom resources
//!
//! [`KindAdapter`] implements [`EntitySource`] once for every
//! [`DomainResource`]: the repository side is any [`Repository`] of the
//! kind's spec, the cluster side is a [`WorkloadApi`] over the custom
//! resource itself.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, info};

use kiln_common::crd::DomainResource;
use kiln_common::hash::structural_hash_for;
use kiln_common::retry::{retry_on_conflict, RetryConfig};
use kiln_common::{Error, Result};

use crate::entity::{EntitySource, ExternalServiceEntity, StorageEntity};
use crate::repository::{ListQuery, Listing, Record, Repository};

/// CRUD on the domain custom resource of one namespace
#[async_trait]
pub trait WorkloadApi<K>: Send + Sync {
    /// Fetch one object, `None` when absent
    async fn get(&self, id: &str) -> Result<Option<K>>;

    /// List every object
    async fn list(&self) -> Result<Vec<K>>;

    /// Create an object
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace an object; the object's `resourceVersion` guards the write
    async fn replace(&self, obj: &K) -> Result<K>;

    /// Delete an object and cascade to its owned children
    ///
    /// Deleting an absent object succeeds.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// [`WorkloadApi`] backed by the Kubernetes API
pub struct KubeWorkloadApi<K> {
    api: Api<K>,
}

impl<K: DomainResource> KubeWorkloadApi<K> {
    /// Create an API handle for the given namespace
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl<K: DomainResource> WorkloadApi<K> for KubeWorkloadApi<K> {
    async fn get(&self, id: &str) -> Result<Option<K>> {
        self.api
            .get_opt(id)
            .await
            .map_err(|e| Error::from_kube(K::KIND.as_str(), id, e))
    }

    async fn list(&self) -> Result<Vec<K>> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let id = obj.entity_id();
        self.api
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(K::KIND.as_str(), id, e))
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let id = obj.entity_id();
        self.api
            .replace(&id, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(K::KIND.as_str(), id.as_str(), e))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.api.delete(id, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) => match Error::from_kube(K::KIND.as_str(), id, e) {
                Error::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}

/// Entity source for one domain kind
pub struct KindAdapter<K: DomainResource> {
    namespace: String,
    repository: Arc<dyn Repository<K::Spec>>,
    workloads: Arc<dyn WorkloadApi<K>>,
}

impl<K: DomainResource> KindAdapter<K> {
    /// Bind a repository and a workload API; new objects land in `namespace`
    pub fn new(
        namespace: impl Into<String>,
        repository: Arc<dyn Repository<K::Spec>>,
        workloads: Arc<dyn WorkloadApi<K>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            repository,
            workloads,
        }
    }

    fn cluster_entity(&self, object: K) -> ClusterEntity<K> {
        ClusterEntity {
            id: object.entity_id(),
            object,
            repository: self.repository.clone(),
            workloads: self.workloads.clone(),
        }
    }
}

#[async_trait]
impl<K: DomainResource> EntitySource for KindAdapter<K> {
    type Storage = StoredEntity<K>;
    type Service = ClusterEntity<K>;

    fn kind(&self) -> &str {
        K::KIND.as_str()
    }

    async fn list_storage(&self) -> Result<Listing<StoredEntity<K>>> {
        let records = self.repository.list(&ListQuery::all()).await?;
        Ok(records.map(|record| StoredEntity {
            record,
            namespace: self.namespace.clone(),
            repository: self.repository.clone(),
            workloads: self.workloads.clone(),
        }))
    }

    async fn list_service(&self) -> Result<Vec<ClusterEntity<K>>> {
        let objects = self.workloads.list().await?;
        Ok(objects
            .into_iter()
            .map(|obj| self.cluster_entity(obj))
            .collect())
    }

    async fn get_service(&self, id: &str) -> Result<Option<ClusterEntity<K>>> {
        Ok(self
            .workloads
            .get(id)
            .await?
            .map(|obj| self.cluster_entity(obj)))
    }
}

/// A repository record seen through [`StorageEntity`]
pub struct StoredEntity<K: DomainResource> {
    record: Record<K::Spec>,
    namespace: String,
    repository: Arc<dyn Repository<K::Spec>>,
    workloads: Arc<dyn WorkloadApi<K>>,
}

impl<K: DomainResource> StoredEntity<K> {
    /// The underlying record
    pub fn record(&self) -> &Record<K::Spec> {
        &self.record
    }
}

#[async_trait]
impl<K: DomainResource> StorageEntity for StoredEntity<K> {
    fn id(&self) -> &str {
        &self.record.id
    }

    fn spec_hash(&self) -> Result<String> {
        structural_hash_for(K::KIND.as_str(), &self.record.spec)
    }

    fn status_hash(&self) -> Result<String> {
        structural_hash_for(K::KIND.as_str(), &self.record.status)
    }

    async fn create_in_service(&self) -> Result<()> {
        let obj = K::build(&self.record.id, &self.namespace, self.record.spec.clone());
        self.workloads.create(&obj).await?;
        info!(kind = %K::KIND, id = %self.record.id, "Created cluster object");
        Ok(())
    }

    async fn update_in_service(&self) -> Result<()> {
        let workloads = &self.workloads;
        let record = &self.record;
        retry_on_conflict(&RetryConfig::conflict(), "update_in_service", move || async move {
            let mut current = workloads
                .get(&record.id)
                .await?
                .ok_or_else(|| Error::not_found(K::KIND.as_str(), record.id.as_str()))?;
            current.set_entity_spec(record.spec.clone());
            workloads.replace(&current).await.map(|_| ())
        })
        .await?;
        info!(kind = %K::KIND, id = %self.record.id, "Updated cluster object spec");
        Ok(())
    }

    async fn delete_in_service(&self) -> Result<()> {
        self.workloads.delete(&self.record.id).await?;
        info!(kind = %K::KIND, id = %self.record.id, "Deleted cluster object");
        Ok(())
    }

    async fn delete_in_db(&self) -> Result<()> {
        match self.repository.delete(&self.record.id).await {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        info!(kind = %K::KIND, id = %self.record.id, "Purged record");
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.record.status.is_terminal() && !self.record.deletion_mark
    }

    fn has_deletion_mark(&self) -> bool {
        self.record.deletion_mark
    }
}

/// A cluster object seen through [`ExternalServiceEntity`]
pub struct ClusterEntity<K: DomainResource> {
    id: String,
    object: K,
    repository: Arc<dyn Repository<K::Spec>>,
    workloads: Arc<dyn WorkloadApi<K>>,
}

impl<K: DomainResource> ClusterEntity<K> {
    /// The underlying cluster object
    pub fn object(&self) -> &K {
        &self.object
    }
}

#[async_trait]
impl<K: DomainResource> ExternalServiceEntity for ClusterEntity<K> {
    fn id(&self) -> &str {
        &self.id
    }

    fn spec_hash(&self) -> Result<String> {
        structural_hash_for(K::KIND.as_str(), self.object.entity_spec())
    }

    fn status_hash(&self) -> Result<String> {
        let status = self.object.entity_status().cloned().unwrap_or_default();
        structural_hash_for(K::KIND.as_str(), &status)
    }

    fn is_deleting(&self) -> bool {
        self.object.is_deleting()
    }

    async fn delete(&self) -> Result<()> {
        self.workloads.delete(&self.id).await?;
        info!(kind = %K::KIND, id = %self.id, "Deleted orphaned cluster object");
        Ok(())
    }

    async fn report_status(&self) -> Result<()> {
        let Some(record) = self.repository.get(&self.id).await? else {
            debug!(kind = %K::KIND, id = %self.id, "No record for cluster object, skipping status report");
            return Ok(());
        };
        let status = self.object.entity_status().cloned().unwrap_or_default();
        if structural_hash_for(K::KIND.as_str(), &record.status)? == self.status_hash()? {
            return Ok(());
        }

        // Status only: the spec and deletion mark may have moved since `get`.
        let state = status.state;
        match self.repository.update_status(&self.id, &status).await {
            Ok(()) => {
                debug!(kind = %K::KIND, id = %self.id, %state, "Reported status to repository");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
