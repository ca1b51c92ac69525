use std::sync::Arc;

use chrono::Utc;
use kube::runtime::events::{EventType, Recorder};
use tracing::{debug, info, instrument, warn};

use super::ReconcileErr;
use super::events::{
    REASON_CREATED, REASON_INVALID, REASON_TORN_DOWN, REASON_UPDATED,
    emit_event,
};
use super::finalizer::{ensure_finalizer, remove_finalizer, teardown};
use super::readiness::{ReadinessState, workload_readiness};
use super::status::{self, should_patch_status};
use crate::crd::{GridCluster, GridClusterStatus};
use crate::membership::ClusterContexts;
use crate::resources::{
    APPLY_ORDER, ClusterKey, ManagedKind, ManagedObject, ObjectKey,
    build_desired, merge_mutable,
};
use crate::store::{ObjectStore, StoreError};
use crate::validation::validate;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ApplyOutcome {
    pub fn is_mutation(self) -> bool {
        !matches!(self, ApplyOutcome::Unchanged)
    }
}

/// What one pass did and what it observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    pub readiness: ReadinessState,
    pub outcomes: Vec<(ManagedKind, ApplyOutcome)>,
}

impl ReconcileReport {
    fn idle(readiness: ReadinessState) -> Self {
        Self {
            readiness,
            outcomes: Vec::new(),
        }
    }

    /// Number of managed objects created or updated.
    pub fn mutations(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_mutation())
            .count()
    }
}

/// Drives one `GridCluster` towards its desired state per call. Callers must
/// not run two passes for the same key at once; the kube-runtime controller
/// guarantees that in production.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    contexts: Option<ClusterContexts>,
    recorder: Option<Recorder>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            contexts: None,
            recorder: None,
        }
    }

    /// Connect to clusters once they turn ready and report their members.
    pub fn with_contexts(mut self, contexts: ClusterContexts) -> Self {
        self.contexts = Some(contexts);
        self
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    #[instrument(skip_all, fields(ns = %key.namespace, name = %key.name))]
    pub async fn reconcile(
        &self,
        key: &ClusterKey,
    ) -> Result<ReconcileReport, ReconcileErr> {
        let Some(cluster) = self.store.get_cluster(key).await? else {
            // removed without our finalizer running; its context must not outlive it
            if let Some(contexts) = &self.contexts {
                if contexts.disconnect(key).await {
                    info!("cluster vanished; closed its membership client");
                }
            }
            debug!("cluster absent; nothing to do");
            return Ok(ReconcileReport::idle(ReadinessState::Unknown));
        };

        if cluster.metadata.deletion_timestamp.is_some() {
            return self.finalize(key, cluster).await;
        }

        if let Err(e) = validate(&cluster.spec) {
            warn!(error = %e, "rejecting invalid spec");
            let next = status::failed(&cluster, &e, now());
            if let Err(se) = self.write_status(&cluster, next).await {
                warn!(error = %se, "failed to record validation failure");
            }
            self.emit(&cluster, EventType::Warning, REASON_INVALID, "Validate", Some(e.to_string()))
                .await;
            return Err(e.into());
        }

        let cluster = ensure_finalizer(self.store(), cluster).await?;

        let mut outcomes = Vec::with_capacity(APPLY_ORDER.len());
        for kind in APPLY_ORDER {
            let outcome = self.apply(kind, &cluster).await?;
            outcomes.push((kind, outcome));
        }

        let workload = self
            .store
            .get(&ObjectKey::for_cluster(ManagedKind::StatefulWorkload, key))
            .await?;
        let sts = match &workload {
            Some(ManagedObject::StatefulWorkload(s)) => Some(s),
            _ => None,
        };
        let readiness = workload_readiness(sts, cluster.spec.cluster_size);

        let members = match &self.contexts {
            Some(contexts) => {
                if readiness == ReadinessState::Ready {
                    match contexts.ensure_connected(&cluster).await {
                        Ok(_) => {}
                        // membership is advisory; the pass still converged
                        Err(e) => warn!(error = %e, "cluster client connect failed"),
                    }
                }
                contexts.snapshot(key).await
            }
            None => None,
        };

        let next = status::observed(&cluster, readiness, members.as_ref(), now());
        self.write_status(&cluster, next).await?;

        let report = ReconcileReport {
            readiness,
            outcomes,
        };
        info!(
            readiness = %report.readiness,
            mutations = report.mutations(),
            "reconciled"
        );
        Ok(report)
    }

    async fn finalize(
        &self,
        key: &ClusterKey,
        cluster: GridCluster,
    ) -> Result<ReconcileReport, ReconcileErr> {
        let deleted = teardown(self.store(), &cluster).await?;
        if let Some(contexts) = &self.contexts {
            contexts.disconnect(key).await;
        }
        self.emit(
            &cluster,
            EventType::Normal,
            REASON_TORN_DOWN,
            "Teardown",
            Some(format!("deleted {} cluster-scoped objects", deleted.len())),
        )
        .await;
        remove_finalizer(self.store(), cluster).await?;
        info!("teardown complete; finalizer removed");
        Ok(ReconcileReport::idle(ReadinessState::Terminating))
    }

    async fn apply(
        &self,
        kind: ManagedKind,
        cluster: &GridCluster,
    ) -> Result<ApplyOutcome, ReconcileErr> {
        let desired = build_desired(kind, cluster);
        let obj_key = desired.key();
        let outcome = match self.store.get(&obj_key).await? {
            None => {
                self.store.create(&desired).await?;
                ApplyOutcome::Created
            }
            Some(current) => match merge_mutable(&current, &desired) {
                Some(merged) => {
                    self.store.update(&merged).await?;
                    ApplyOutcome::Updated
                }
                None => ApplyOutcome::Unchanged,
            },
        };

        match outcome {
            ApplyOutcome::Created => {
                info!(kind = %kind, object = %obj_key, "created");
                self.emit(cluster, EventType::Normal, REASON_CREATED, "Apply", Some(obj_key.to_string()))
                    .await;
            }
            ApplyOutcome::Updated => {
                info!(kind = %kind, object = %obj_key, "updated");
                self.emit(cluster, EventType::Normal, REASON_UPDATED, "Apply", Some(obj_key.to_string()))
                    .await;
            }
            ApplyOutcome::Unchanged => {
                debug!(kind = %kind, object = %obj_key, "unchanged");
            }
        }
        Ok(outcome)
    }

    async fn write_status(
        &self,
        cluster: &GridCluster,
        next: GridClusterStatus,
    ) -> Result<(), StoreError> {
        if !should_patch_status(cluster.status.as_ref(), &next) {
            return Ok(());
        }
        let mut patched = cluster.clone();
        patched.status = Some(next);
        self.store.update_cluster_status(&patched).await
    }

    async fn emit(
        &self,
        cluster: &GridCluster,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        if let Some(recorder) = &self.recorder {
            emit_event(recorder, cluster, type_, reason, action, note).await;
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}
