use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, RoleBinding};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};

use super::{ObjectStore, StoreError};
use crate::crd::GridCluster;
use crate::resources::{
    ClusterKey, ManagedKind, ManagedObject, ObjectKey,
};

/// `ObjectStore` backed by the Kubernetes API server. Every call is bounded
/// by `timeout`; an elapsed call surfaces as `StoreError::Timeout`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    timeout: Duration,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, timeout: Duration, field_manager: &str) -> Self {
        Self {
            client,
            timeout,
            field_manager: field_manager.to_string(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn namespaced<K>(&self, ns: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns.unwrap_or("default"))
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(|e| map_kube_err(what, e)),
            Err(_) => {
                debug!(%what, timeout=?self.timeout, "kube call timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }

    async fn get_typed<K>(
        &self,
        api: Api<K>,
        name: &str,
    ) -> Result<Option<K>, StoreError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        self.call(name, api.get_opt(name)).await
    }

    async fn create_typed<K>(&self, api: Api<K>, obj: &K) -> Result<(), StoreError>
    where
        K: Resource + Clone + Serialize + DeserializeOwned + Debug,
    {
        let pp = self.post_params();
        let name = obj.name_any();
        self.call(&name, api.create(&pp, obj)).await.map(|_| ())
    }

    async fn replace_typed<K>(&self, api: Api<K>, obj: &K) -> Result<(), StoreError>
    where
        K: Resource + Clone + Serialize + DeserializeOwned + Debug,
    {
        let pp = self.post_params();
        let name = obj.name_any();
        self.call(&name, api.replace(&name, &pp, obj))
            .await
            .map(|_| ())
    }

    async fn delete_typed<K>(&self, api: Api<K>, name: &str) -> Result<bool, StoreError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        match self
            .call(name, api.delete(name, &DeleteParams::default()))
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => {
                trace!(%name, "delete: already absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn map_kube_err(what: &str, e: kube::Error) -> StoreError {
    match &e {
        kube::Error::Api(ae) => match ae.code {
            404 => StoreError::NotFound(what.to_string()),
            409 => StoreError::Conflict(what.to_string()),
            422 => StoreError::Invalid {
                key: what.to_string(),
                message: ae.message.clone(),
            },
            _ => StoreError::Api(e.to_string()),
        },
        _ => StoreError::Api(e.to_string()),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_cluster(
        &self,
        key: &ClusterKey,
    ) -> Result<Option<GridCluster>, StoreError> {
        let api: Api<GridCluster> = self.namespaced(Some(&key.namespace));
        self.get_typed(api, &key.name).await
    }

    async fn update_cluster(
        &self,
        cluster: &GridCluster,
    ) -> Result<GridCluster, StoreError> {
        let api: Api<GridCluster> =
            self.namespaced(cluster.namespace().as_deref());
        let name = cluster.name_any();
        let pp = self.post_params();
        self.call(&name, api.replace(&name, &pp, cluster)).await
    }

    async fn update_cluster_status(
        &self,
        cluster: &GridCluster,
    ) -> Result<(), StoreError> {
        let api: Api<GridCluster> =
            self.namespaced(cluster.namespace().as_deref());
        let name = cluster.name_any();
        let patch = json!({ "status": cluster.status });
        self.call(
            &name,
            api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await
        .map(|_| ())
    }

    async fn get(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<ManagedObject>, StoreError> {
        let ns = key.namespace.as_deref();
        let name = key.name.as_str();
        Ok(match key.kind {
            ManagedKind::ClusterRole => self
                .get_typed::<ClusterRole>(Api::all(self.client.clone()), name)
                .await?
                .map(ManagedObject::ClusterRole),
            ManagedKind::ServiceAccount => self
                .get_typed::<ServiceAccount>(self.namespaced(ns), name)
                .await?
                .map(ManagedObject::ServiceAccount),
            ManagedKind::RoleBinding => self
                .get_typed::<RoleBinding>(self.namespaced(ns), name)
                .await?
                .map(ManagedObject::RoleBinding),
            ManagedKind::HeadlessService => self
                .get_typed::<Service>(self.namespaced(ns), name)
                .await?
                .map(ManagedObject::HeadlessService),
            ManagedKind::StatefulWorkload => self
                .get_typed::<StatefulSet>(self.namespaced(ns), name)
                .await?
                .map(ManagedObject::StatefulWorkload),
        })
    }

    async fn create(&self, obj: &ManagedObject) -> Result<(), StoreError> {
        let ns = obj.metadata().namespace.as_deref();
        match obj {
            ManagedObject::ClusterRole(o) => {
                self.create_typed(Api::all(self.client.clone()), o).await
            }
            ManagedObject::ServiceAccount(o) => {
                self.create_typed(self.namespaced(ns), o).await
            }
            ManagedObject::RoleBinding(o) => {
                self.create_typed(self.namespaced(ns), o).await
            }
            ManagedObject::HeadlessService(o) => {
                self.create_typed(self.namespaced(ns), o).await
            }
            ManagedObject::StatefulWorkload(o) => {
                self.create_typed(self.namespaced(ns), o).await
            }
        }
    }

    async fn update(&self, obj: &ManagedObject) -> Result<(), StoreError> {
        let ns = obj.metadata().namespace.as_deref();
        match obj {
            ManagedObject::ClusterRole(o) => {
                self.replace_typed(Api::all(self.client.clone()), o).await
            }
            ManagedObject::ServiceAccount(o) => {
                self.replace_typed(self.namespaced(ns), o).await
            }
            ManagedObject::RoleBinding(o) => {
                self.replace_typed(self.namespaced(ns), o).await
            }
            ManagedObject::HeadlessService(o) => {
                self.replace_typed(self.namespaced(ns), o).await
            }
            ManagedObject::StatefulWorkload(o) => {
                self.replace_typed(self.namespaced(ns), o).await
            }
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool, StoreError> {
        let ns = key.namespace.as_deref();
        let name = key.name.as_str();
        match key.kind {
            ManagedKind::ClusterRole => {
                self.delete_typed::<ClusterRole>(
                    Api::all(self.client.clone()),
                    name,
                )
                .await
            }
            ManagedKind::ServiceAccount => {
                self.delete_typed::<ServiceAccount>(self.namespaced(ns), name)
                    .await
            }
            ManagedKind::RoleBinding => {
                self.delete_typed::<RoleBinding>(self.namespaced(ns), name)
                    .await
            }
            ManagedKind::HeadlessService => {
                self.delete_typed::<Service>(self.namespaced(ns), name).await
            }
            ManagedKind::StatefulWorkload => {
                self.delete_typed::<StatefulSet>(self.namespaced(ns), name)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("code {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn maps_status_codes_to_store_errors() {
        assert!(map_kube_err("x", api_err(404)).is_not_found());
        assert_eq!(
            map_kube_err("x", api_err(409)),
            StoreError::Conflict("x".into())
        );
        assert!(matches!(
            map_kube_err("x", api_err(422)),
            StoreError::Invalid { .. }
        ));
        assert!(map_kube_err("x", api_err(500)).is_transient());
    }
}
