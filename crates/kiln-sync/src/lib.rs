//! Bidirectional synchronization between the entity repository and the
//! cluster custom resources that mirror it.
//!
//! The [`SyncEngine`] is written once against the [`StorageEntity`] and
//! [`ExternalServiceEntity`] capability traits. [`KindAdapter`] binds those
//! traits to a concrete repository and custom resource for every Kiln kind.

#![deny(missing_docs)]

pub mod adapter;
pub mod configmap;
pub mod engine;
pub mod entity;
pub mod memory;
pub mod repository;

#[cfg(test)]
mod testing;

pub use adapter::{ClusterEntity, KindAdapter, KubeWorkloadApi, StoredEntity, WorkloadApi};
pub use configmap::ConfigMapRepository;
pub use engine::{plan, ServiceDeletion, SyncConfig, SyncEngine, SyncPlan, SyncReport};
pub use entity::{EntitySource, ExternalServiceEntity, StorageEntity};
pub use memory::MemoryRepository;
pub use repository::{ListQuery, Listing, Record, Repository};
