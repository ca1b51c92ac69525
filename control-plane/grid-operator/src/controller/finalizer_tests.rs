use super::finalizer::*;
use crate::crd::{GridCluster, GridClusterSpec};
use crate::resources::{ClusterKey, ManagedKind, ObjectKey, build_desired};
use crate::store::{MemoryStore, ObjectStore, StoreError, StoreOp};

fn stored_cluster(store: &MemoryStore) -> GridCluster {
    let mut c = GridCluster::new("c1", GridClusterSpec::default());
    c.metadata.namespace = Some("ns1".into());
    store.insert_cluster(c)
}

#[tokio::test]
async fn ensure_finalizer_is_idempotent() {
    let store = MemoryStore::new();
    let c = stored_cluster(&store);
    assert!(!has_finalizer(&c));

    let c = ensure_finalizer(&store, c).await.unwrap();
    assert!(has_finalizer(&c));
    let rv = c.metadata.resource_version.clone();

    let c = ensure_finalizer(&store, c).await.unwrap();
    assert_eq!(c.metadata.resource_version, rv);
    assert_eq!(c.metadata.finalizers.as_ref().map(Vec::len), Some(1));
}

#[tokio::test]
async fn ensure_finalizer_surfaces_conflict() {
    let store = MemoryStore::new();
    let stale = stored_cluster(&store);
    store.edit_cluster(&ClusterKey::of(&stale), |c| c.spec.cluster_size = 5);
    let err = ensure_finalizer(&store, stale).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn teardown_only_touches_non_cascading_kinds() {
    let store = MemoryStore::new();
    let c = stored_cluster(&store);
    for kind in [ManagedKind::ClusterRole, ManagedKind::ServiceAccount] {
        store.create(&build_desired(kind, &c)).await.unwrap();
    }
    let deleted = teardown(&store, &c).await.unwrap();
    let role = ObjectKey::for_cluster(ManagedKind::ClusterRole, &ClusterKey::of(&c));
    assert_eq!(deleted, vec![role.clone()]);
    assert!(store.object(&role).is_none());
    assert_eq!(store.object_count(), 1);
}

#[tokio::test]
async fn teardown_tolerates_absent_objects() {
    let store = MemoryStore::new();
    let c = stored_cluster(&store);
    store.fail_next(
        StoreOp::Delete,
        None,
        StoreError::NotFound("gone".into()),
        1,
    );
    let deleted = teardown(&store, &c).await.unwrap();
    assert!(deleted.is_empty());
}

#[tokio::test]
async fn teardown_reports_only_objects_it_removed() {
    let store = MemoryStore::new();
    let c = stored_cluster(&store);
    // the cluster role was never created, or someone else removed it
    let deleted = teardown(&store, &c).await.unwrap();
    assert!(deleted.is_empty());
    assert!(store.mutations().is_empty());

    store
        .create(&build_desired(ManagedKind::ClusterRole, &c))
        .await
        .unwrap();
    assert_eq!(teardown(&store, &c).await.unwrap().len(), 1);
    assert!(teardown(&store, &c).await.unwrap().is_empty());
}

#[tokio::test]
async fn teardown_failure_is_returned() {
    let store = MemoryStore::new();
    let c = stored_cluster(&store);
    store.fail_next(
        StoreOp::Delete,
        Some(ManagedKind::ClusterRole),
        StoreError::Timeout(std::time::Duration::from_secs(1)),
        1,
    );
    let err = teardown(&store, &c).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn remove_finalizer_releases_pending_deletion() {
    let store = MemoryStore::new();
    let c = stored_cluster(&store);
    let key = ClusterKey::of(&c);
    ensure_finalizer(&store, c).await.unwrap();
    store.request_deletion(&key);
    let held = store.cluster(&key).unwrap();
    assert!(held.metadata.deletion_timestamp.is_some());

    remove_finalizer(&store, held).await.unwrap();
    assert!(store.cluster(&key).is_none());
}
