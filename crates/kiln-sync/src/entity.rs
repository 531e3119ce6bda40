//! Entity Adapter capability traits
//!
//! The sync engine never touches repositories or cluster objects directly.
//! It works on two views of an entity: the repository side
//! ([`StorageEntity`]) and the cluster side ([`ExternalServiceEntity`]).
//! Hashes are recomputed on every call and are only used for equality.

use async_trait::async_trait;
use kiln_common::Result;

use crate::repository::Listing;

/// Repository-side view of an entity
#[async_trait]
pub trait StorageEntity: Send + Sync {
    /// Entity ID shared by both sides
    fn id(&self) -> &str;

    /// Structural hash of the desired spec
    fn spec_hash(&self) -> Result<String>;

    /// Structural hash of the last reported status
    fn status_hash(&self) -> Result<String>;

    /// Create the cluster object for this record
    async fn create_in_service(&self) -> Result<()>;

    /// Push this record's spec onto the existing cluster object
    async fn update_in_service(&self) -> Result<()>;

    /// Delete the cluster object (children cascade)
    async fn delete_in_service(&self) -> Result<()>;

    /// Purge the record from the repository
    async fn delete_in_db(&self) -> Result<()>;

    /// Whether the entity is terminal and no longer managed by the engine
    fn is_finished(&self) -> bool;

    /// Whether the record carries the soft-delete mark
    fn has_deletion_mark(&self) -> bool;
}

/// Cluster-side view of an entity
#[async_trait]
pub trait ExternalServiceEntity: Send + Sync {
    /// Entity ID shared by both sides
    fn id(&self) -> &str;

    /// Structural hash of the object's spec
    fn spec_hash(&self) -> Result<String>;

    /// Structural hash of the object's status
    fn status_hash(&self) -> Result<String>;

    /// Whether deletion of the object is already in flight
    fn is_deleting(&self) -> bool;

    /// Delete the object (children cascade)
    async fn delete(&self) -> Result<()>;

    /// Copy the object's status into the repository record
    ///
    /// A missing record is not an error.
    async fn report_status(&self) -> Result<()>;
}

/// Lists both representations of one entity kind
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Repository-side entity
    type Storage: StorageEntity;

    /// Cluster-side entity
    type Service: ExternalServiceEntity;

    /// Kind name used in logs
    fn kind(&self) -> &str;

    /// Every repository record, deletion-marked ones included
    ///
    /// Records that exist but cannot be read are reported by ID only.
    async fn list_storage(&self) -> Result<Listing<Self::Storage>>;

    /// Every cluster object
    async fn list_service(&self) -> Result<Vec<Self::Service>>;

    /// One cluster object, `None` when it does not exist
    async fn get_service(&self, id: &str) -> Result<Option<Self::Service>>;
}
