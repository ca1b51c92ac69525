use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{
    ClientConfig, ClientError, ClusterClient, ClusterClientFactory,
    MembershipBridge, MembershipSnapshot,
};
use crate::crd::GridCluster;
use crate::resources::ClusterKey;

/// Everything held on behalf of one managed cluster: its membership bridge,
/// the client feeding it, and the task relaying the bridge's triggers.
pub struct ClusterContext {
    config: ClientConfig,
    bridge: Arc<MembershipBridge>,
    client: Box<dyn ClusterClient>,
    relay: JoinHandle<()>,
}

impl ClusterContext {
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        self.bridge.snapshot()
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
        self.relay.abort();
        debug!(cluster = %self.bridge.key(), "cluster context closed");
    }
}

/// Registry of live [`ClusterContext`]s, created when a cluster first turns
/// ready and closed on teardown or process shutdown.
#[derive(Clone)]
pub struct ClusterContexts {
    inner: Arc<RwLock<HashMap<ClusterKey, ClusterContext>>>,
    factory: Arc<dyn ClusterClientFactory>,
    triggers: flume::Sender<ClusterKey>,
    local_run: bool,
}

impl ClusterContexts {
    pub fn new(
        factory: Arc<dyn ClusterClientFactory>,
        triggers: flume::Sender<ClusterKey>,
        local_run: bool,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            factory,
            triggers,
            local_run,
        }
    }

    /// Connect to `cluster` unless a context with the same settings exists.
    /// Returns whether a new connection was made.
    pub async fn ensure_connected(
        &self,
        cluster: &GridCluster,
    ) -> Result<bool, ClientError> {
        let key = ClusterKey::of(cluster);
        let config = ClientConfig::for_cluster(cluster, self.local_run);
        {
            let r = self.inner.read().await;
            if r.get(&key).map(|c| c.config == config).unwrap_or(false) {
                return Ok(false);
            }
        }

        // one pending trigger per cluster is enough; the relay feeds the
        // shared channel so other clusters cannot crowd this one out
        let (tx, rx) = flume::bounded(1);
        let bridge = Arc::new(MembershipBridge::new(key.clone(), tx));
        let client = self
            .factory
            .connect(config.clone(), bridge.listener())
            .await?;
        let relay = tokio::spawn(relay_triggers(rx, self.triggers.clone()));
        let ctx = ClusterContext {
            config,
            bridge,
            client,
            relay,
        };

        let replaced = self.inner.write().await.insert(key.clone(), ctx);
        if let Some(old) = replaced {
            old.shutdown().await;
        }
        info!(cluster = %key, "cluster context opened");
        Ok(true)
    }

    pub async fn snapshot(&self, key: &ClusterKey) -> Option<MembershipSnapshot> {
        let r = self.inner.read().await;
        r.get(key).map(ClusterContext::snapshot)
    }

    pub async fn is_connected(&self, key: &ClusterKey) -> bool {
        self.inner.read().await.contains_key(key)
    }

    /// Close the context of `key`, if any.
    pub async fn disconnect(&self, key: &ClusterKey) -> bool {
        let removed = self.inner.write().await.remove(key);
        match removed {
            Some(ctx) => {
                ctx.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub async fn shutdown_all(&self) {
        let drained: Vec<ClusterContext> = {
            let mut w = self.inner.write().await;
            w.drain().map(|(_, ctx)| ctx).collect()
        };
        for ctx in drained {
            ctx.shutdown().await;
        }
    }
}

async fn relay_triggers(
    rx: flume::Receiver<ClusterKey>,
    out: flume::Sender<ClusterKey>,
) {
    while let Ok(key) = rx.recv_async().await {
        if out.send_async(key).await.is_err() {
            break;
        }
    }
}
