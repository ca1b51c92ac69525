use std::fmt;

use k8s_openapi::api::apps::v1::StatefulSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessState {
    Unknown,
    Provisioning,
    Ready,
    Terminating,
}

impl ReadinessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadinessState::Unknown => "Unknown",
            ReadinessState::Provisioning => "Provisioning",
            ReadinessState::Ready => "Ready",
            ReadinessState::Terminating => "Terminating",
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readiness of the member workload against the desired cluster size.
/// A missing workload is `Unknown`; anything short of fully rolled out at
/// the current generation is `Provisioning`.
pub fn workload_readiness(
    sts: Option<&StatefulSet>,
    desired_replicas: i32,
) -> ReadinessState {
    match sts {
        None => ReadinessState::Unknown,
        Some(s) if is_stateful_set_ready(s, desired_replicas) => {
            ReadinessState::Ready
        }
        Some(_) => ReadinessState::Provisioning,
    }
}

pub fn is_stateful_set_ready(sts: &StatefulSet, expected_replicas: i32) -> bool {
    let Some(status) = sts.status.as_ref() else {
        return false;
    };
    let all_updated = status.updated_replicas.unwrap_or(0) == expected_replicas;
    let all_ready = status.ready_replicas.unwrap_or(0) == expected_replicas;
    // an observation of an older generation says nothing about the current spec
    let at_expected_generation =
        sts.metadata.generation.is_some()
            && sts.metadata.generation == status.observed_generation;
    all_updated && all_ready && at_expected_generation
}
