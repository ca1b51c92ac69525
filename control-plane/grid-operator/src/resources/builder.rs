use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, PodSpec, PodTemplateSpec, Probe, SecretKeySelector,
    SecurityContext, Service, ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, PolicyRule, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use super::{ManagedKind, ManagedObject, labels_for};
use crate::crd::GridCluster;

pub const CONTAINER_NAME: &str = "grid";
pub const MEMBER_PORT: i32 = 5701;
pub const MEMBER_PORT_NAME: &str = "grid";
pub const SERVICE_PORT_NAME: &str = "grid-port";
pub const HEALTH_PATH: &str = "/hazelcast/health/node-state";
pub const LICENSE_ENV: &str = "HZ_LICENSEKEY";
pub const LICENSE_DATA_KEY: &str = "license-key";
const RUN_AS_USER: i64 = 65534;
const TERMINATION_GRACE_SECS: i64 = 600;

/// Desired state of one managed object for `cluster`. Pure and deterministic;
/// the cluster must already have passed validation.
pub fn build_desired(kind: ManagedKind, cluster: &GridCluster) -> ManagedObject {
    match kind {
        ManagedKind::ClusterRole => {
            ManagedObject::ClusterRole(cluster_role(cluster))
        }
        ManagedKind::ServiceAccount => {
            ManagedObject::ServiceAccount(service_account(cluster))
        }
        ManagedKind::RoleBinding => {
            ManagedObject::RoleBinding(role_binding(cluster))
        }
        ManagedKind::HeadlessService => {
            ManagedObject::HeadlessService(headless_service(cluster))
        }
        ManagedKind::StatefulWorkload => {
            ManagedObject::StatefulWorkload(stateful_set(cluster))
        }
    }
}

fn namespace_of(cluster: &GridCluster) -> String {
    cluster.namespace().unwrap_or_else(|| "default".to_string())
}

/// Cluster-scoped: no namespace and no owner reference.
fn cluster_metadata(cluster: &GridCluster) -> ObjectMeta {
    ObjectMeta {
        name: Some(cluster.name_any()),
        labels: Some(labels_for(&cluster.name_any())),
        ..Default::default()
    }
}

fn namespaced_metadata(cluster: &GridCluster) -> ObjectMeta {
    ObjectMeta {
        name: Some(cluster.name_any()),
        namespace: Some(namespace_of(cluster)),
        labels: Some(labels_for(&cluster.name_any())),
        // None until the API server has assigned the owner a uid
        owner_references: cluster.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

pub fn cluster_role(cluster: &GridCluster) -> ClusterRole {
    ClusterRole {
        metadata: cluster_metadata(cluster),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(
                ["endpoints", "pods", "nodes", "services"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            verbs: vec!["get".to_string(), "list".to_string()],
            ..Default::default()
        }]),
        ..Default::default()
    }
}

pub fn service_account(cluster: &GridCluster) -> ServiceAccount {
    ServiceAccount {
        metadata: namespaced_metadata(cluster),
        ..Default::default()
    }
}

pub fn role_binding(cluster: &GridCluster) -> RoleBinding {
    let name = cluster.name_any();
    RoleBinding {
        metadata: namespaced_metadata(cluster),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: Some(namespace_of(cluster)),
            ..Default::default()
        }]),
    }
}

pub fn headless_service(cluster: &GridCluster) -> Service {
    Service {
        metadata: namespaced_metadata(cluster),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some("None".to_string()),
            selector: Some(labels_for(&cluster.name_any())),
            ports: Some(vec![ServicePort {
                name: Some(SERVICE_PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                port: MEMBER_PORT,
                target_port: Some(IntOrString::String(
                    MEMBER_PORT_NAME.to_string(),
                )),
                ..Default::default()
            }]),
            // members must resolve each other before they report ready
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn stateful_set(cluster: &GridCluster) -> StatefulSet {
    let name = cluster.name_any();
    let labels = labels_for(&name);
    StatefulSet {
        metadata: namespaced_metadata(cluster),
        spec: Some(StatefulSetSpec {
            replicas: Some(cluster.spec.cluster_size),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: name.clone(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name),
                    containers: vec![member_container(cluster)],
                    termination_grace_period_seconds: Some(
                        TERMINATION_GRACE_SECS,
                    ),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn member_container(cluster: &GridCluster) -> Container {
    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(cluster.spec.image()),
        ports: Some(vec![ContainerPort {
            name: Some(MEMBER_PORT_NAME.to_string()),
            container_port: MEMBER_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(member_env(cluster)),
        liveness_probe: Some(health_probe()),
        readiness_probe: Some(health_probe()),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    }
}

fn member_env(cluster: &GridCluster) -> Vec<EnvVar> {
    let mut env = Vec::new();
    if let Some(secret) = cluster.spec.license_secret() {
        env.push(EnvVar {
            name: LICENSE_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.to_string(),
                    key: LICENSE_DATA_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    let plain = [
        ("HZ_NETWORK_JOIN_KUBERNETES_ENABLED", "true".to_string()),
        ("HZ_NETWORK_JOIN_KUBERNETES_SERVICENAME", cluster.name_any()),
        ("HZ_NETWORK_RESTAPI_ENABLED", "true".to_string()),
        (
            "HZ_NETWORK_RESTAPI_ENDPOINTGROUPS_HEALTHCHECK_ENABLED",
            "true".to_string(),
        ),
        (
            "HZ_NETWORK_RESTAPI_ENDPOINTGROUPS_CLUSTERREAD_ENABLED",
            "true".to_string(),
        ),
    ];
    env.extend(plain.into_iter().map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }));
    env
}

/// Members join slowly; ten misses at a 10s period before the kubelet acts.
fn health_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::Int(MEMBER_PORT),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        timeout_seconds: Some(10),
        period_seconds: Some(10),
        success_threshold: Some(1),
        failure_threshold: Some(10),
        ..Default::default()
    }
}

fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(RUN_AS_USER),
        privileged: Some(false),
        read_only_root_filesystem: Some(true),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
