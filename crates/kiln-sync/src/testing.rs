//! In-memory [`WorkloadApi`] used by the crate's tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};

use kiln_common::crd::DomainResource;
use kiln_common::{Error, Result};

use crate::adapter::WorkloadApi;

/// Cluster objects held in a map; every call is logged as `<op>:<id>`
pub(crate) struct FakeWorkloads<K> {
    objects: Mutex<BTreeMap<String, K>>,
    calls: Mutex<Vec<String>>,
    replace_conflicts: AtomicU32,
}

impl<K> Default for FakeWorkloads<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            replace_conflicts: AtomicU32::new(0),
        }
    }
}

impl<K: DomainResource> FakeWorkloads<K> {
    pub(crate) fn insert(&self, obj: K) {
        self.objects.lock().unwrap().insert(obj.entity_id(), obj);
    }

    pub(crate) fn object(&self, id: &str) -> Option<K> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn set_deleting(&self, id: &str) {
        if let Some(obj) = self.objects.lock().unwrap().get_mut(id) {
            obj.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    pub(crate) fn fail_next_replaces(&self, n: u32) {
        self.replace_conflicts.store(n, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn log(&self, op: &str, id: &str) {
        self.calls.lock().unwrap().push(format!("{op}:{id}"));
    }
}

#[async_trait]
impl<K: DomainResource> WorkloadApi<K> for FakeWorkloads<K> {
    async fn get(&self, id: &str) -> Result<Option<K>> {
        Ok(self.object(id))
    }

    async fn list(&self) -> Result<Vec<K>> {
        Ok(self.objects.lock().unwrap().values().cloned().collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let id = obj.name_any();
        self.log("create", &id);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&id) {
            return Err(Error::already_exists(K::KIND.as_str(), id));
        }
        objects.insert(id, obj.clone());
        Ok(obj.clone())
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let id = obj.name_any();
        self.log("replace", &id);
        let pending = self.replace_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.replace_conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(Error::conflict(K::KIND.as_str(), id));
        }
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&id) {
            return Err(Error::not_found(K::KIND.as_str(), id));
        }
        objects.insert(id, obj.clone());
        Ok(obj.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.log("delete", id);
        self.objects.lock().unwrap().remove(id);
        Ok(())
    }
}
