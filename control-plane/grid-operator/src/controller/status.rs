use serde_json::{Value as JsonValue, json};
use tracing::{debug, trace};

use super::readiness::ReadinessState;
use crate::crd::{GridCluster, GridClusterStatus, MemberStatus, Phase};
use crate::membership::MembershipSnapshot;
use crate::validation::ValidationError;

pub fn observed(
    cluster: &GridCluster,
    readiness: ReadinessState,
    members: Option<&MembershipSnapshot>,
    now: String,
) -> GridClusterStatus {
    let (phase, message) = match readiness {
        ReadinessState::Ready => (
            Phase::Running,
            format!("{} members ready", cluster.spec.cluster_size),
        ),
        ReadinessState::Terminating => {
            (Phase::Terminating, "cluster is being deleted".to_string())
        }
        ReadinessState::Provisioning | ReadinessState::Unknown => (
            Phase::Pending,
            format!(
                "waiting for {} members to become ready",
                cluster.spec.cluster_size
            ),
        ),
    };
    GridClusterStatus {
        phase: Some(phase),
        message: Some(message),
        readiness: Some(readiness.to_string()),
        observed_generation: cluster.metadata.generation,
        last_updated: Some(now),
        members: members.map(member_statuses).unwrap_or_default(),
    }
}

pub fn failed(
    cluster: &GridCluster,
    err: &ValidationError,
    now: String,
) -> GridClusterStatus {
    GridClusterStatus {
        phase: Some(Phase::Failed),
        message: Some(err.to_string()),
        readiness: None,
        observed_generation: cluster.metadata.generation,
        last_updated: Some(now),
        // membership of a previous valid spec stays visible
        members: cluster
            .status
            .as_ref()
            .map(|s| s.members.clone())
            .unwrap_or_default(),
    }
}

fn member_statuses(snapshot: &MembershipSnapshot) -> Vec<MemberStatus> {
    snapshot
        .iter()
        .map(|(id, connected)| MemberStatus {
            id: id.clone(),
            connected: *connected,
        })
        .collect()
}

pub fn should_patch_status(
    current: Option<&GridClusterStatus>,
    desired: &GridClusterStatus,
) -> bool {
    match current {
        None => {
            debug!("should_patch_status: no current status, patching");
            true
        }
        Some(cur) => {
            let cur_norm = normalize_status(cur);
            let des_norm = normalize_status(desired);
            let differs = cur_norm != des_norm;
            if differs {
                debug!(
                    "should_patch_status: status differs, patching\ncurrent={}\ndesired={}",
                    cur_norm, des_norm
                );
            } else {
                trace!("should_patch_status: status identical, skipping patch");
            }
            differs
        }
    }
}

fn normalize_status(s: &GridClusterStatus) -> JsonValue {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({}));
    if let JsonValue::Object(ref mut map) = v {
        // changes on every pass without meaning anything
        map.remove("lastUpdated");
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GridClusterSpec;

    fn cluster() -> GridCluster {
        let mut c = GridCluster::new("c1", GridClusterSpec::default());
        c.metadata.generation = Some(2);
        c
    }

    #[test]
    fn ready_maps_to_running_with_members() {
        let snap = MembershipSnapshot::from([("Member a - 1".to_string(), true)]);
        let s = observed(&cluster(), ReadinessState::Ready, Some(&snap), "t".into());
        assert_eq!(s.phase, Some(Phase::Running));
        assert_eq!(s.readiness.as_deref(), Some("Ready"));
        assert_eq!(s.observed_generation, Some(2));
        assert_eq!(
            s.members,
            vec![MemberStatus {
                id: "Member a - 1".into(),
                connected: true
            }]
        );
    }

    #[test]
    fn timestamp_alone_does_not_trigger_patch() {
        let c = cluster();
        let a = observed(&c, ReadinessState::Provisioning, None, "t1".into());
        let b = observed(&c, ReadinessState::Provisioning, None, "t2".into());
        assert!(!should_patch_status(Some(&a), &b));
        assert!(should_patch_status(None, &b));
    }

    #[test]
    fn readiness_or_generation_change_triggers_patch() {
        let mut c = cluster();
        let a = observed(&c, ReadinessState::Provisioning, None, "t".into());
        let b = observed(&c, ReadinessState::Ready, None, "t".into());
        assert!(should_patch_status(Some(&a), &b));
        c.metadata.generation = Some(3);
        let d = observed(&c, ReadinessState::Provisioning, None, "t".into());
        assert!(should_patch_status(Some(&a), &d));
    }

    #[test]
    fn validation_failure_keeps_previous_members() {
        let mut c = cluster();
        let snap = MembershipSnapshot::from([("m".to_string(), true)]);
        c.status = Some(observed(&c, ReadinessState::Ready, Some(&snap), "t".into()));
        let s = failed(&c, &ValidationError::MissingLicense, "t".into());
        assert_eq!(s.phase, Some(Phase::Failed));
        assert!(s.message.unwrap().contains("licenseKeySecret"));
        assert_eq!(s.members.len(), 1);
    }
}
