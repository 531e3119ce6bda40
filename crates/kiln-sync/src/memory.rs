//! In-process repository backend

use std::collections::BTreeMap;

use async_trait::async_trait;
use kiln_common::crd::EntityStatus;
use kiln_common::{Error, Result};
use tokio::sync::RwLock;

use crate::repository::{ListQuery, Listing, Record, Repository};

/// Repository held in memory, keyed and ordered by ID
///
/// Used by tests and single-node development runs. Nothing survives a
/// restart.
pub struct MemoryRepository<S> {
    kind: String,
    records: RwLock<BTreeMap<String, Record<S>>>,
}

impl<S> MemoryRepository<S> {
    /// Create an empty repository; `kind` only appears in error messages
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the repository holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl<S> Repository<S> for MemoryRepository<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> Result<Option<Record<S>>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<Record<S>>> {
        let records = self.records.read().await;
        Ok(query.apply(records.values().cloned()).into())
    }

    async fn create(&self, record: Record<S>) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(Error::already_exists(&self.kind, record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, record: Record<S>) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(Error::not_found(&self.kind, record.id)),
        }
    }

    async fn update_status(&self, id: &str, status: &EntityStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::not_found(&self.kind, id))?;
        record.status = status.clone();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(&self.kind, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get() {
        let repo = MemoryRepository::new("ModelTraining");
        repo.create(Record::new("a", "spec".to_string())).await.unwrap();

        let record = repo.get("a").await.unwrap().unwrap();
        assert_eq!(record.spec, "spec");
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let repo = MemoryRepository::new("ModelTraining");
        repo.create(Record::new("a", 1)).await.unwrap();
        let err = repo.create(Record::new("a", 2)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert_eq!(repo.get("a").await.unwrap().unwrap().spec, 1);
    }

    #[tokio::test]
    async fn update_and_delete_require_existing_record() {
        let repo: MemoryRepository<u32> = MemoryRepository::new("ModelTraining");
        assert!(repo.update(Record::new("a", 1)).await.unwrap_err().is_not_found());
        assert!(repo.delete("a").await.unwrap_err().is_not_found());

        repo.create(Record::new("a", 1)).await.unwrap();
        repo.update(Record::new("a", 2).marked_for_deletion())
            .await
            .unwrap();
        let record = repo.get("a").await.unwrap().unwrap();
        assert_eq!(record.spec, 2);
        assert!(record.deletion_mark);

        repo.delete("a").await.unwrap();
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn status_update_keeps_spec_and_mark() {
        use kiln_common::crd::EntityState;

        let repo = MemoryRepository::new("ModelTraining");
        repo.create(Record::new("a", 1).marked_for_deletion())
            .await
            .unwrap();
        repo.update_status("a", &EntityStatus::with_state(EntityState::Running))
            .await
            .unwrap();

        let record = repo.get("a").await.unwrap().unwrap();
        assert_eq!(record.spec, 1);
        assert!(record.deletion_mark);
        assert_eq!(record.status.state, EntityState::Running);

        let err = repo
            .update_status("missing", &EntityStatus::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_is_ordered_by_id() {
        let repo = MemoryRepository::new("ModelTraining");
        for id in ["c", "a", "b"] {
            repo.create(Record::new(id, 0)).await.unwrap();
        }
        let ids: Vec<_> = repo
            .list(&ListQuery::all())
            .await
            .unwrap()
            .items
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(repo.len().await, 3);
    }
}
