#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use grid_operator::crd::{GridCluster, GridClusterSpec};
use grid_operator::membership::{
    ClientConfig, ClientError, ClusterClient, ClusterClientFactory,
    MemberInfo, MembershipListener, MembershipStateChanged,
};
use grid_operator::resources::{ClusterKey, ManagedKind, ObjectKey};
use grid_operator::store::MemoryStore;
use k8s_openapi::api::rbac::v1::ClusterRole;
use kube::{Api, Client};
use tokio::task::JoinHandle;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

// Env guard utilities
pub struct EnvGuard {
    key: &'static str,
    old: Option<String>,
}
impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe {
            if let Some(ref v) = self.old {
                std::env::set_var(self.key, v);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }
}
pub fn set_env(key: &'static str, val: &str) -> EnvGuard {
    let old = std::env::var(key).ok();
    unsafe {
        std::env::set_var(key, val);
    }
    EnvGuard { key, old }
}

pub fn grid_cluster(ns: &str, name: &str, spec: GridClusterSpec) -> GridCluster {
    let mut c = GridCluster::new(name, spec);
    c.metadata.namespace = Some(ns.to_string());
    c
}

/// Admit `c1` in `ns1` with the given size and return its key.
pub fn seed(store: &MemoryStore, spec: GridClusterSpec) -> ClusterKey {
    let stored = store.insert_cluster(grid_cluster("ns1", "c1", spec));
    ClusterKey::of(&stored)
}

pub fn workload_key(key: &ClusterKey) -> ObjectKey {
    ObjectKey::for_cluster(ManagedKind::StatefulWorkload, key)
}

pub fn member(n: u8) -> MemberInfo {
    MemberInfo::new(format!("10.0.0.{n}:5701"), format!("uuid-{n}"))
}

/// Cluster client factory that hands the registered listeners to the test.
#[derive(Default)]
pub struct ManualClientFactory {
    listeners: Mutex<Vec<(ClientConfig, MembershipListener)>>,
    closed: Arc<AtomicUsize>,
}

impl ManualClientFactory {
    pub fn emit(&self, event: MembershipStateChanged) {
        let listener = self
            .listeners
            .lock()
            .unwrap()
            .last()
            .map(|(_, l)| l.clone())
            .expect("no client connected");
        listener(event);
    }

    pub fn connects(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn last_config(&self) -> Option<ClientConfig> {
        self.listeners.lock().unwrap().last().map(|(c, _)| c.clone())
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ManualClient(Arc<AtomicUsize>);

#[async_trait]
impl ClusterClient for ManualClient {
    async fn shutdown(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterClientFactory for ManualClientFactory {
    async fn connect(
        &self,
        config: ClientConfig,
        listener: MembershipListener,
    ) -> Result<Box<dyn ClusterClient>, ClientError> {
        self.listeners.lock().unwrap().push((config, listener));
        Ok(Box::new(ManualClient(Arc::clone(&self.closed))))
    }
}

pub async fn recv_trigger(
    rx: &flume::Receiver<ClusterKey>,
) -> Option<ClusterKey> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
        .await
        .ok()
        .and_then(Result::ok)
}

pub async fn cleanup_k8s(ns: &str, name: &str, client: Client) {
    // Best-effort: the ClusterRole is the only object without an owner
    let grid_api: Api<GridCluster> = Api::namespaced(client.clone(), ns);
    let role_api: Api<ClusterRole> = Api::all(client);
    let _ = grid_api.delete(name, &Default::default()).await;
    let _ = role_api.delete(name, &Default::default()).await;
}

// RAII guard to ensure controller abort + cleanup
pub struct ControllerGuard {
    ns: String,
    name: String,
    client: Client,
    ctrl: Option<JoinHandle<()>>,
}

impl ControllerGuard {
    pub fn new(ns: &str, name: &str, client: Client) -> Self {
        Self {
            ns: ns.to_string(),
            name: name.to_string(),
            client,
            ctrl: None,
        }
    }

    pub fn with_controller(mut self, ctrl: JoinHandle<()>) -> Self {
        self.ctrl = Some(ctrl);
        self
    }
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        if let Some(h) = self.ctrl.take() {
            h.abort();
        }
        let ns = self.ns.clone();
        let name = self.name.clone();
        let client = self.client.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                cleanup_k8s(&ns, &name, client).await;
            });
        }
    }
}
