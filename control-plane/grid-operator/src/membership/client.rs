use std::sync::Arc;

use async_trait::async_trait;

use super::MembershipStateChanged;
use crate::crd::{ExposeExternallyType, GridCluster};
use crate::resources::ClusterKey;
use crate::resources::builder::MEMBER_PORT;

/// Address used when the operator runs outside the cluster and reaches the
/// members through a port-forward.
pub const LOCAL_RUN_ADDRESS: &str = "127.0.0.1:8000";

/// Invoked by a client for every membership transition, from the client's
/// own task. Events for the same member arrive in emission order.
pub type MembershipListener = Arc<dyn Fn(MembershipStateChanged) + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("no member address configured")]
    NoAddress,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("member endpoint returned status {0}")]
    Status(u16),
    #[error("unrecognized member list: {0}")]
    Parse(String),
}

/// Connection settings for one grid cluster. A change to any field makes
/// the registry drop the open client and connect again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Grid-level cluster name; identifies the connection in logs.
    pub cluster_name: String,
    /// Member endpoints, in the order they are tried.
    pub addresses: Vec<String>,
    /// Talk to the first address only. Otherwise any address that answers
    /// will do, and polling moves on when one stops answering.
    pub unisocket: bool,
}

impl ClientConfig {
    pub fn for_cluster(cluster: &GridCluster, local_run: bool) -> Self {
        let cluster_name = cluster.spec.cluster_name.clone();
        if local_run {
            return Self {
                cluster_name,
                addresses: vec![LOCAL_RUN_ADDRESS.to_string()],
                unisocket: true,
            };
        }
        let key = ClusterKey::of(cluster);
        let unisocket = cluster
            .spec
            .expose_externally
            .as_ref()
            .map(|e| e.type_ == ExposeExternallyType::Unisocket)
            .unwrap_or(false);
        Self {
            cluster_name,
            addresses: vec![format!(
                "{}.{}.svc.cluster.local:{}",
                key.name, key.namespace, MEMBER_PORT
            )],
            unisocket,
        }
    }
}

/// A live connection to a grid cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Stop delivering events and release the connection.
    async fn shutdown(&self);
}

#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    /// Connect and start delivering membership events to `listener`. The
    /// listener is registered before the first event can be produced.
    async fn connect(
        &self,
        config: ClientConfig,
        listener: MembershipListener,
    ) -> Result<Box<dyn ClusterClient>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ExposeExternallyConfiguration, GridClusterSpec};

    fn cluster() -> GridCluster {
        let mut c = GridCluster::new(
            "c1",
            GridClusterSpec {
                cluster_name: "prod".into(),
                ..Default::default()
            },
        );
        c.metadata.namespace = Some("ns1".into());
        c
    }

    #[test]
    fn in_cluster_config_targets_service_dns() {
        let cfg = ClientConfig::for_cluster(&cluster(), false);
        assert_eq!(cfg.cluster_name, "prod");
        assert_eq!(cfg.addresses, vec!["c1.ns1.svc.cluster.local:5701"]);
        assert!(!cfg.unisocket);
    }

    #[test]
    fn local_run_uses_forwarded_port_and_unisocket() {
        let cfg = ClientConfig::for_cluster(&cluster(), true);
        assert_eq!(cfg.addresses, vec![LOCAL_RUN_ADDRESS]);
        assert!(cfg.unisocket);
    }

    #[test]
    fn unisocket_exposure_is_honored_in_cluster() {
        let mut c = cluster();
        c.spec.expose_externally = Some(ExposeExternallyConfiguration {
            type_: ExposeExternallyType::Unisocket,
            member_access: None,
        });
        assert!(ClientConfig::for_cluster(&c, false).unisocket);
    }
}
