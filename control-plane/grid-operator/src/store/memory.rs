//! In-process `ObjectStore` with the API-server behaviours the engine relies
//! on: optimistic concurrency on `resourceVersion`, generation bumps on spec
//! changes, finalizer-gated deletion, and owner-reference garbage collection.
//! Faults can be queued per operation to exercise retry paths.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::api::apps::v1::StatefulSetStatus;

use super::{ObjectStore, StoreError};
use crate::crd::GridCluster;
use crate::resources::{ClusterKey, ManagedKind, ManagedObject, ObjectKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    GetCluster,
    UpdateCluster,
    UpdateStatus,
    Get,
    Create,
    Update,
    Delete,
}

/// A write that reached a managed object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub op: StoreOp,
    pub key: ObjectKey,
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    kind: Option<ManagedKind>,
    error: StoreError,
    remaining: usize,
}

#[derive(Debug, Default)]
struct Inner {
    clusters: BTreeMap<ClusterKey, GridCluster>,
    objects: BTreeMap<ObjectKey, ManagedObject>,
    mutations: Vec<Mutation>,
    faults: VecDeque<Fault>,
    revision: u64,
    uid_seq: u64,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn take_fault(
        &mut self,
        op: StoreOp,
        kind: Option<ManagedKind>,
    ) -> Result<(), StoreError> {
        let Some(idx) = self
            .faults
            .iter()
            .position(|f| f.op == op && (f.kind.is_none() || f.kind == kind))
        else {
            return Ok(());
        };
        let fault = &mut self.faults[idx];
        let err = fault.error.clone();
        fault.remaining -= 1;
        if fault.remaining == 0 {
            self.faults.remove(idx);
        }
        Err(err)
    }

    /// Drop the cluster once nothing holds it, then collect its owned objects.
    fn finish_deletion(&mut self, key: &ClusterKey) {
        let Some(cluster) = self.clusters.get(key) else {
            return;
        };
        let held = cluster
            .metadata
            .finalizers
            .as_ref()
            .map(|f| !f.is_empty())
            .unwrap_or(false);
        if cluster.metadata.deletion_timestamp.is_none() || held {
            return;
        }
        let uid = cluster.metadata.uid.clone();
        self.clusters.remove(key);
        self.objects.retain(|_, obj| {
            !obj.metadata()
                .owner_references
                .as_ref()
                .map(|refs| refs.iter().any(|r| Some(&r.uid) == uid.as_ref()))
                .unwrap_or(false)
        });
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicking test must not wedge the others
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a new `GridCluster` the way the API server would.
    pub fn insert_cluster(&self, mut cluster: GridCluster) -> GridCluster {
        let mut inner = self.lock();
        inner.uid_seq += 1;
        if cluster.metadata.namespace.is_none() {
            cluster.metadata.namespace = Some("default".into());
        }
        cluster.metadata.uid = Some(format!("uid-{}", inner.uid_seq));
        cluster.metadata.generation = Some(1);
        cluster.metadata.resource_version = Some(inner.next_revision());
        inner
            .clusters
            .insert(ClusterKey::of(&cluster), cluster.clone());
        cluster
    }

    /// Replace the spec of a stored cluster, bumping its generation.
    pub fn edit_cluster(
        &self,
        key: &ClusterKey,
        edit: impl FnOnce(&mut GridCluster),
    ) -> Option<GridCluster> {
        let mut inner = self.lock();
        let rv = inner.next_revision();
        let cluster = inner.clusters.get_mut(key)?;
        edit(cluster);
        cluster.metadata.generation =
            Some(cluster.metadata.generation.unwrap_or(0) + 1);
        cluster.metadata.resource_version = Some(rv);
        Some(cluster.clone())
    }

    /// Request deletion. Without finalizers the cluster disappears at once.
    pub fn request_deletion(&self, key: &ClusterKey) {
        let mut inner = self.lock();
        let rv = inner.next_revision();
        if let Some(cluster) = inner.clusters.get_mut(key) {
            cluster.metadata.deletion_timestamp =
                Some(Time(chrono::Utc::now()));
            cluster.metadata.resource_version = Some(rv);
        }
        inner.finish_deletion(key);
    }

    pub fn cluster(&self, key: &ClusterKey) -> Option<GridCluster> {
        self.lock().clusters.get(key).cloned()
    }

    pub fn object(&self, key: &ObjectKey) -> Option<ManagedObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Fail the next `times` calls of `op` (optionally only for `kind`).
    pub fn fail_next(
        &self,
        op: StoreOp,
        kind: Option<ManagedKind>,
        error: StoreError,
        times: usize,
    ) {
        if times == 0 {
            return;
        }
        self.lock().faults.push_back(Fault {
            op,
            kind,
            error,
            remaining: times,
        });
    }

    /// Simulate the workload controller reporting progress for the current
    /// generation of a StatefulSet.
    pub fn report_workload_status(&self, key: &ObjectKey, updated: i32, ready: i32) {
        let mut inner = self.lock();
        if let Some(ManagedObject::StatefulWorkload(sts)) =
            inner.objects.get_mut(key)
        {
            let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
            sts.status = Some(StatefulSetStatus {
                replicas,
                updated_replicas: Some(updated),
                ready_replicas: Some(ready),
                observed_generation: sts.metadata.generation,
                ..Default::default()
            });
        }
    }
}

fn spec_of(obj: &ManagedObject) -> serde_json::Value {
    match obj {
        ManagedObject::ClusterRole(o) => serde_json::to_value(&o.rules),
        ManagedObject::ServiceAccount(_) => Ok(serde_json::Value::Null),
        ManagedObject::RoleBinding(o) => serde_json::to_value(&o.subjects),
        ManagedObject::HeadlessService(o) => serde_json::to_value(&o.spec),
        ManagedObject::StatefulWorkload(o) => serde_json::to_value(&o.spec),
    }
    .unwrap_or_default()
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_cluster(
        &self,
        key: &ClusterKey,
    ) -> Result<Option<GridCluster>, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(StoreOp::GetCluster, None)?;
        Ok(inner.clusters.get(key).cloned())
    }

    async fn update_cluster(
        &self,
        cluster: &GridCluster,
    ) -> Result<GridCluster, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(StoreOp::UpdateCluster, None)?;
        let key = ClusterKey::of(cluster);
        let Some(stored) = inner.clusters.get(&key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if stored.metadata.resource_version != cluster.metadata.resource_version
        {
            return Err(StoreError::Conflict(key.to_string()));
        }
        let mut next = stored.clone();
        // only metadata is writable through this call
        next.metadata.finalizers = cluster.metadata.finalizers.clone();
        next.metadata.labels = cluster.metadata.labels.clone();
        next.metadata.annotations = cluster.metadata.annotations.clone();
        let rv = inner.next_revision();
        next.metadata.resource_version = Some(rv);
        inner.clusters.insert(key.clone(), next.clone());
        inner.finish_deletion(&key);
        Ok(next)
    }

    async fn update_cluster_status(
        &self,
        cluster: &GridCluster,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.take_fault(StoreOp::UpdateStatus, None)?;
        let key = ClusterKey::of(cluster);
        let rv = inner.next_revision();
        let Some(stored) = inner.clusters.get_mut(&key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        stored.status = cluster.status.clone();
        stored.metadata.resource_version = Some(rv);
        Ok(())
    }

    async fn get(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ManagedObject>, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(StoreOp::Get, Some(key.kind))?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn create(&self, obj: &ManagedObject) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = obj.key();
        inner.take_fault(StoreOp::Create, Some(key.kind))?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::Conflict(key.to_string()));
        }
        let mut stored = obj.clone();
        let rv = inner.next_revision();
        inner.uid_seq += 1;
        let uid = format!("uid-{}", inner.uid_seq);
        let meta = stored.metadata_mut();
        meta.resource_version = Some(rv);
        meta.uid = Some(uid);
        meta.generation = Some(1);
        inner.objects.insert(key.clone(), stored);
        inner.mutations.push(Mutation {
            op: StoreOp::Create,
            key,
        });
        Ok(())
    }

    async fn update(&self, obj: &ManagedObject) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = obj.key();
        inner.take_fault(StoreOp::Update, Some(key.kind))?;
        let Some(current) = inner.objects.get(&key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if current.metadata().resource_version != obj.metadata().resource_version
        {
            return Err(StoreError::Conflict(key.to_string()));
        }
        let spec_changed = spec_of(current) != spec_of(obj);
        let generation = current.metadata().generation.unwrap_or(1);
        let mut stored = obj.clone();
        let rv = inner.next_revision();
        let meta = stored.metadata_mut();
        meta.resource_version = Some(rv);
        meta.generation = Some(if spec_changed { generation + 1 } else { generation });
        inner.objects.insert(key.clone(), stored);
        inner.mutations.push(Mutation {
            op: StoreOp::Update,
            key,
        });
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        inner.take_fault(StoreOp::Delete, Some(key.kind))?;
        let existed = inner.objects.remove(key).is_some();
        if existed {
            inner.mutations.push(Mutation {
                op: StoreOp::Delete,
                key: key.clone(),
            });
        }
        Ok(existed)
    }
}
