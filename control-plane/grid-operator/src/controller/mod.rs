pub mod events;
pub mod finalizer;
pub mod readiness;
pub mod reconcile;
pub mod status;

#[cfg(test)]
mod finalizer_tests;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::runtime::events::{Recorder, Reporter};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, controller::Action, watcher::Config};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::GridCluster;
use crate::membership::{ClusterContexts, RestClientFactory};
use crate::resources::ClusterKey;
use crate::store::{KubeStore, StoreError};
use crate::validation::ValidationError;

pub use readiness::ReadinessState;
pub use reconcile::{ApplyOutcome, ReconcileReport, Reconciler};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    /// The spec breaks an invariant; nothing was touched.
    #[error("invalid spec: {0}")]
    Validation(#[from] ValidationError),
    /// A write was rejected; the whole pass must run again.
    #[error("persist failed: {0}")]
    Persist(#[source] StoreError),
    #[error("transient api error: {0}")]
    Transient(#[source] StoreError),
}

impl From<StoreError> for ReconcileErr {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            ReconcileErr::Transient(e)
        } else {
            ReconcileErr::Persist(e)
        }
    }
}

impl ReconcileErr {
    /// Only a spec change can fix a validation failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileErr::Validation(_))
    }
}

pub struct ControllerContext {
    pub reconciler: Reconciler,
    pub cfg: OperatorConfig,
}

pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let (trigger_tx, trigger_rx) = flume::bounded::<ClusterKey>(cfg.trigger_capacity);

    let store = Arc::new(KubeStore::new(
        client.clone(),
        Duration::from_secs(cfg.api_timeout_secs),
        &cfg.field_manager,
    ));
    let factory = Arc::new(RestClientFactory::new(
        Duration::from_secs(cfg.member_poll_secs),
        Duration::from_secs(cfg.api_timeout_secs),
    )?);
    let contexts =
        ClusterContexts::new(factory, trigger_tx, cfg.local_run.unwrap_or(false));
    let recorder = Recorder::new(
        client.clone(),
        Reporter {
            controller: cfg.field_manager.clone(),
            instance: std::env::var("POD_NAME").ok(),
        },
    );
    let reconciler = Reconciler::new(store)
        .with_contexts(contexts.clone())
        .with_recorder(recorder);
    let ctx = Arc::new(ControllerContext {
        reconciler,
        cfg: cfg.clone(),
    });

    let clusters: Api<GridCluster> = scoped_api(&client, cfg.watch_namespace.as_deref());
    let triggers = trigger_rx.into_stream().map(|key: ClusterKey| {
        ObjectRef::<GridCluster>::new(&key.name).within(&key.namespace)
    });

    info!(namespace = ?cfg.watch_namespace, "starting GridCluster controller");
    Controller::new(clusters, Config::default().any_semantic())
        .owns(
            scoped_api::<StatefulSet>(&client, cfg.watch_namespace.as_deref()),
            Config::default(),
        )
        .owns(
            scoped_api::<Service>(&client, cfg.watch_namespace.as_deref()),
            Config::default(),
        )
        .owns(
            scoped_api::<ServiceAccount>(&client, cfg.watch_namespace.as_deref()),
            Config::default(),
        )
        .owns(
            scoped_api::<RoleBinding>(&client, cfg.watch_namespace.as_deref()),
            Config::default(),
        )
        .reconcile_on(triggers)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(object = %obj_ref, "reconciled: requeue={:?}", action)
                }
                Err(e) => warn!(error = %e, "reconcile error"),
            }
        })
        .await;

    contexts.shutdown_all().await;
    info!("controller stopped");
    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn reconcile(
    obj: Arc<GridCluster>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    // always work from a fresh read; the cached object may be stale
    let key = ClusterKey::of(&obj);
    let report = ctx.reconciler.reconcile(&key).await?;
    Ok(match report.readiness {
        ReadinessState::Ready => {
            Action::requeue(Duration::from_secs(ctx.cfg.requeue_secs))
        }
        ReadinessState::Provisioning | ReadinessState::Unknown => {
            Action::requeue(Duration::from_secs(ctx.cfg.progress_requeue_secs))
        }
        ReadinessState::Terminating => Action::await_change(),
    })
}

fn error_policy(
    obj: Arc<GridCluster>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    if !err.is_retryable() {
        warn!(cluster = %ClusterKey::of(&obj), error = %err, "waiting for spec change");
        return Action::await_change();
    }
    error!(cluster = %ClusterKey::of(&obj), error = %err, "reconcile failed; backing off");
    Action::requeue(Duration::from_secs(ctx.cfg.error_backoff_secs))
}
