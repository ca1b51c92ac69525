use tracing::{debug, info};

use crate::crd::GridCluster;
use crate::resources::{APPLY_ORDER, ClusterKey, ObjectKey};
use crate::store::{ObjectStore, StoreError};

pub const FINALIZER: &str = "grid.io/finalizer";

pub fn has_finalizer(cluster: &GridCluster) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|x| x == FINALIZER))
        .unwrap_or(false)
}

/// Add the finalizer if missing and persist it. Returns the stored object so
/// later writes in the same pass carry the fresh resourceVersion.
pub async fn ensure_finalizer(
    store: &dyn ObjectStore,
    cluster: GridCluster,
) -> Result<GridCluster, StoreError> {
    if has_finalizer(&cluster) {
        return Ok(cluster);
    }
    let mut next = cluster;
    next.metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(FINALIZER.to_string());
    let stored = store.update_cluster(&next).await?;
    debug!(cluster = %ClusterKey::of(&stored), "finalizer added");
    Ok(stored)
}

/// Delete the objects the garbage collector cannot reach, in reverse apply
/// order. Absent objects count as deleted; the first other failure stops the
/// walk and is returned.
pub async fn teardown(
    store: &dyn ObjectStore,
    cluster: &GridCluster,
) -> Result<Vec<ObjectKey>, StoreError> {
    let key = ClusterKey::of(cluster);
    let mut deleted = Vec::new();
    for kind in APPLY_ORDER
        .iter()
        .rev()
        .copied()
        .filter(|k| !k.traits().cascade_deletable)
    {
        let obj_key = ObjectKey::for_cluster(kind, &key);
        match store.delete(&obj_key).await {
            Ok(true) => {
                info!(cluster = %key, object = %obj_key, "teardown: deleted");
                deleted.push(obj_key);
            }
            Ok(false) | Err(StoreError::NotFound(_)) => {
                debug!(cluster = %key, object = %obj_key, "teardown: already absent");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(deleted)
}

/// Drop the finalizer. A cluster that vanished meanwhile is already done.
pub async fn remove_finalizer(
    store: &dyn ObjectStore,
    cluster: GridCluster,
) -> Result<(), StoreError> {
    if !has_finalizer(&cluster) {
        return Ok(());
    }
    let mut next = cluster;
    if let Some(finalizers) = next.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER);
    }
    match store.update_cluster(&next).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
