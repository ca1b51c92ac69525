pub mod builder;
pub mod diff;


use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::GridCluster;

pub use builder::build_desired;
pub use diff::{FieldRule, Mutability, field_rules, merge_mutable};

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const APP_NAME: &str = "grid";
pub const MANAGED_BY: &str = "grid-operator";

/// Identity of a `GridCluster` object: the unit of reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(cluster: &GridCluster) -> Self {
        Self::new(
            cluster.namespace().unwrap_or_else(|| "default".to_string()),
            cluster.name_any(),
        )
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedKind {
    ClusterRole,
    ServiceAccount,
    RoleBinding,
    HeadlessService,
    StatefulWorkload,
}

/// Dependency order for apply. Teardown walks it backwards.
pub const APPLY_ORDER: [ManagedKind; 5] = [
    ManagedKind::ClusterRole,
    ManagedKind::ServiceAccount,
    ManagedKind::RoleBinding,
    ManagedKind::HeadlessService,
    ManagedKind::StatefulWorkload,
];

/// Static capabilities of a managed kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindTraits {
    /// Kubernetes `kind` of the object.
    pub k8s_kind: &'static str,
    pub namespaced: bool,
    /// Removed by the garbage collector through its owner reference when
    /// the `GridCluster` goes away. Kinds without it need explicit teardown.
    pub cascade_deletable: bool,
}

impl ManagedKind {
    pub const fn traits(self) -> KindTraits {
        match self {
            ManagedKind::ClusterRole => KindTraits {
                k8s_kind: "ClusterRole",
                namespaced: false,
                cascade_deletable: false,
            },
            ManagedKind::ServiceAccount => KindTraits {
                k8s_kind: "ServiceAccount",
                namespaced: true,
                cascade_deletable: true,
            },
            ManagedKind::RoleBinding => KindTraits {
                k8s_kind: "RoleBinding",
                namespaced: true,
                cascade_deletable: true,
            },
            ManagedKind::HeadlessService => KindTraits {
                k8s_kind: "Service",
                namespaced: true,
                cascade_deletable: true,
            },
            ManagedKind::StatefulWorkload => KindTraits {
                k8s_kind: "StatefulSet",
                namespaced: true,
                cascade_deletable: true,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        self.traits().k8s_kind
    }
}

impl fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store key of a managed object; `namespace` is `None` for cluster-scoped kinds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ManagedKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// Every managed object is named after its cluster.
    pub fn for_cluster(kind: ManagedKind, cluster: &ClusterKey) -> Self {
        Self {
            kind,
            namespace: kind
                .traits()
                .namespaced
                .then(|| cluster.namespace.clone()),
            name: cluster.name.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ManagedObject {
    ClusterRole(ClusterRole),
    ServiceAccount(ServiceAccount),
    RoleBinding(RoleBinding),
    HeadlessService(Service),
    StatefulWorkload(StatefulSet),
}

impl ManagedObject {
    pub fn kind(&self) -> ManagedKind {
        match self {
            ManagedObject::ClusterRole(_) => ManagedKind::ClusterRole,
            ManagedObject::ServiceAccount(_) => ManagedKind::ServiceAccount,
            ManagedObject::RoleBinding(_) => ManagedKind::RoleBinding,
            ManagedObject::HeadlessService(_) => ManagedKind::HeadlessService,
            ManagedObject::StatefulWorkload(_) => ManagedKind::StatefulWorkload,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedObject::ClusterRole(o) => &o.metadata,
            ManagedObject::ServiceAccount(o) => &o.metadata,
            ManagedObject::RoleBinding(o) => &o.metadata,
            ManagedObject::HeadlessService(o) => &o.metadata,
            ManagedObject::StatefulWorkload(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::ClusterRole(o) => &mut o.metadata,
            ManagedObject::ServiceAccount(o) => &mut o.metadata,
            ManagedObject::RoleBinding(o) => &mut o.metadata,
            ManagedObject::HeadlessService(o) => &mut o.metadata,
            ManagedObject::StatefulWorkload(o) => &mut o.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let kind = self.kind();
        let meta = self.metadata();
        ObjectKey {
            kind,
            namespace: if kind.traits().namespaced {
                meta.namespace.clone()
            } else {
                None
            },
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

/// Selector labels shared by every managed object. The StatefulSet selector
/// is built from these, so they must stay stable for a given cluster.
pub fn labels_for(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), APP_NAME.to_string()),
        (LABEL_INSTANCE.to_string(), cluster_name.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
    ])
}
