use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "grid.io",
    version = "v1alpha1",
    kind = "GridCluster",
    plural = "gridclusters",
    shortname = "grid",
    namespaced,
    status = "GridClusterStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.clusterSize"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GridClusterSpec {
    /// Container image repository (e.g., "hazelcast/hazelcast").
    #[serde(default = "default_repository")]
    pub repository: String,
    /// Image tag appended to the repository.
    #[serde(default = "default_version")]
    pub version: String,
    /// Number of members in the cluster.
    #[serde(default = "default_cluster_size")]
    pub cluster_size: i32,
    /// Name of the Secret holding the license key. Required for enterprise images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key_secret: Option<String>,
    /// Logical cluster name the member client joins with.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// How clients outside the Kubernetes cluster reach the members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose_externally: Option<ExposeExternallyConfiguration>,
}

impl Default for GridClusterSpec {
    fn default() -> Self {
        Self {
            repository: default_repository(),
            version: default_version(),
            cluster_size: default_cluster_size(),
            license_key_secret: None,
            cluster_name: default_cluster_name(),
            expose_externally: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExposeExternallyConfiguration {
    #[serde(default, rename = "type")]
    pub type_: ExposeExternallyType,
    /// Per-member exposure; must be unset for Unisocket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_access: Option<MemberAccess>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum ExposeExternallyType {
    /// Clients connect to every member directly.
    #[default]
    Smart,
    /// Clients connect through a single load-balanced endpoint.
    Unisocket,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum MemberAccess {
    NodePortExternalIP,
    NodePortNodeName,
    LoadBalancer,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GridClusterStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    /// Members as last reported by the cluster client (advisory).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberStatus>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Running,
    Failed,
    Terminating,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    pub id: String,
    pub connected: bool,
}

impl GridClusterSpec {
    /// Full image reference, `repository:version`.
    pub fn image(&self) -> String {
        format!("{}:{}", self.repository, self.version)
    }

    pub fn license_secret(&self) -> Option<&str> {
        self.license_key_secret
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}

// --- Defaults helpers ---
fn default_repository() -> String {
    "hazelcast/hazelcast".into()
}

fn default_version() -> String {
    "5.0".into()
}

fn default_cluster_size() -> i32 {
    3
}

fn default_cluster_name() -> String {
    "dev".into()
}
