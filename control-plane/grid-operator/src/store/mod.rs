pub mod kube_store;
pub mod memory;

pub use kube_store::KubeStore;
pub use memory::{MemoryStore, Mutation, StoreOp};

use async_trait::async_trait;

use crate::crd::GridCluster;
use crate::resources::{ClusterKey, ManagedObject, ObjectKey};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    /// Write rejected because the object changed underneath us.
    #[error("conflict writing {0}")]
    Conflict(String),
    #[error("invalid object {key}: {message}")]
    Invalid { key: String, message: String },
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("api error: {0}")]
    Api(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Network, timeout and server-side failures that a later pass may not hit.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Api(_))
    }
}

/// CRUD surface the convergence engine needs from the platform.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_cluster(
        &self,
        key: &ClusterKey,
    ) -> Result<Option<GridCluster>, StoreError>;

    /// Persist metadata changes (finalizers) with optimistic concurrency.
    async fn update_cluster(
        &self,
        cluster: &GridCluster,
    ) -> Result<GridCluster, StoreError>;

    async fn update_cluster_status(
        &self,
        cluster: &GridCluster,
    ) -> Result<(), StoreError>;

    async fn get(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ManagedObject>, StoreError>;

    async fn create(&self, obj: &ManagedObject) -> Result<(), StoreError>;

    async fn update(&self, obj: &ManagedObject) -> Result<(), StoreError>;

    /// Deleting an absent object succeeds with `false`.
    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError>;
}
