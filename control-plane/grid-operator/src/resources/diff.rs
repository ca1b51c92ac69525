//! Which fields of a managed object may be re-applied after creation.
//!
//! Ownership links, selectors and identity fields are written once at
//! create time; only the fields marked `Mutable` below are compared and
//! overwritten on later passes. Fields not listed are never touched, so
//! values defaulted by the API server survive updates.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec, Probe};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{ManagedKind, ManagedObject};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutability {
    Mutable,
    Immutable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldRule {
    pub path: &'static str,
    pub mutability: Mutability,
}

const fn mutable(path: &'static str) -> FieldRule {
    FieldRule {
        path,
        mutability: Mutability::Mutable,
    }
}

const fn immutable(path: &'static str) -> FieldRule {
    FieldRule {
        path,
        mutability: Mutability::Immutable,
    }
}

static CLUSTER_ROLE_RULES: &[FieldRule] = &[
    immutable("metadata.name"),
    mutable("metadata.labels"),
    mutable("rules"),
];

static SERVICE_ACCOUNT_RULES: &[FieldRule] = &[
    immutable("metadata.name"),
    immutable("metadata.ownerReferences"),
    mutable("metadata.labels"),
];

static ROLE_BINDING_RULES: &[FieldRule] = &[
    immutable("metadata.name"),
    immutable("metadata.ownerReferences"),
    // the API server rejects roleRef changes
    immutable("roleRef"),
    mutable("metadata.labels"),
    mutable("subjects"),
];

static HEADLESS_SERVICE_RULES: &[FieldRule] = &[
    immutable("metadata.name"),
    immutable("metadata.ownerReferences"),
    immutable("spec.clusterIP"),
    immutable("spec.type"),
    immutable("spec.selector"),
    mutable("metadata.labels"),
    mutable("spec.ports"),
    mutable("spec.publishNotReadyAddresses"),
];

static STATEFUL_WORKLOAD_RULES: &[FieldRule] = &[
    immutable("metadata.name"),
    immutable("metadata.ownerReferences"),
    immutable("spec.selector"),
    immutable("spec.serviceName"),
    immutable("spec.podManagementPolicy"),
    immutable("spec.volumeClaimTemplates"),
    mutable("metadata.labels"),
    mutable("spec.replicas"),
    mutable("spec.template.metadata.labels"),
    mutable("spec.template.spec.serviceAccountName"),
    mutable("spec.template.spec.terminationGracePeriodSeconds"),
    mutable("spec.template.spec.containers[].image"),
    mutable("spec.template.spec.containers[].ports"),
    mutable("spec.template.spec.containers[].env"),
    mutable("spec.template.spec.containers[].livenessProbe"),
    mutable("spec.template.spec.containers[].readinessProbe"),
    mutable("spec.template.spec.containers[].securityContext"),
];

pub fn field_rules(kind: ManagedKind) -> &'static [FieldRule] {
    match kind {
        ManagedKind::ClusterRole => CLUSTER_ROLE_RULES,
        ManagedKind::ServiceAccount => SERVICE_ACCOUNT_RULES,
        ManagedKind::RoleBinding => ROLE_BINDING_RULES,
        ManagedKind::HeadlessService => HEADLESS_SERVICE_RULES,
        ManagedKind::StatefulWorkload => STATEFUL_WORKLOAD_RULES,
    }
}

/// Write the mutable fields of `desired` into a copy of `current`.
/// Returns `None` when every mutable field already matches.
pub fn merge_mutable(
    current: &ManagedObject,
    desired: &ManagedObject,
) -> Option<ManagedObject> {
    let mut merged = current.clone();
    let mut changed = merge_labels(merged.metadata_mut(), desired.metadata());

    match (&mut merged, desired) {
        (ManagedObject::ClusterRole(cur), ManagedObject::ClusterRole(des)) => {
            changed |= assign(&mut cur.rules, &des.rules);
        }
        (ManagedObject::ServiceAccount(_), ManagedObject::ServiceAccount(_)) => {}
        (ManagedObject::RoleBinding(cur), ManagedObject::RoleBinding(des)) => {
            changed |= assign(&mut cur.subjects, &des.subjects);
        }
        (
            ManagedObject::HeadlessService(cur),
            ManagedObject::HeadlessService(des),
        ) => {
            if let Some(des_spec) = des.spec.as_ref() {
                let cur_spec = cur.spec.get_or_insert_with(Default::default);
                changed |= assign(&mut cur_spec.ports, &des_spec.ports);
                changed |= assign(
                    &mut cur_spec.publish_not_ready_addresses,
                    &des_spec.publish_not_ready_addresses,
                );
            }
        }
        (
            ManagedObject::StatefulWorkload(cur),
            ManagedObject::StatefulWorkload(des),
        ) => {
            changed |= merge_stateful_set(cur, des);
        }
        // mismatched kinds never share a key
        _ => return None,
    }

    changed.then_some(merged)
}

fn assign<T: PartialEq + Clone>(current: &mut T, desired: &T) -> bool {
    if current == desired {
        false
    } else {
        *current = desired.clone();
        true
    }
}

/// Desired labels win; labels added by others are kept.
fn merge_labels(current: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let Some(want) = desired.labels.as_ref() else {
        return false;
    };
    let have = current.labels.get_or_insert_with(BTreeMap::new);
    let mut changed = false;
    for (k, v) in want {
        if have.get(k) != Some(v) {
            have.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed
}

fn merge_stateful_set(cur: &mut StatefulSet, des: &StatefulSet) -> bool {
    let Some(des_spec) = des.spec.as_ref() else {
        return false;
    };
    let Some(cur_spec) = cur.spec.as_mut() else {
        // a workload without a spec cannot have been created by us; replace it
        cur.spec = Some(des_spec.clone());
        return true;
    };
    let mut changed = assign(&mut cur_spec.replicas, &des_spec.replicas);
    changed |= merge_pod_template(&mut cur_spec.template, &des_spec.template);
    changed
}

fn merge_pod_template(cur: &mut PodTemplateSpec, des: &PodTemplateSpec) -> bool {
    let mut changed = false;
    if let Some(des_meta) = des.metadata.as_ref() {
        let cur_meta = cur.metadata.get_or_insert_with(Default::default);
        changed |= merge_labels(cur_meta, des_meta);
    }
    let Some(des_pod) = des.spec.as_ref() else {
        return changed;
    };
    let cur_pod = cur.spec.get_or_insert_with(Default::default);
    changed |= assign(
        &mut cur_pod.service_account_name,
        &des_pod.service_account_name,
    );
    changed |= assign(
        &mut cur_pod.termination_grace_period_seconds,
        &des_pod.termination_grace_period_seconds,
    );
    for des_c in &des_pod.containers {
        match cur_pod.containers.iter_mut().find(|c| c.name == des_c.name) {
            Some(cur_c) => changed |= merge_container(cur_c, des_c),
            None => {
                cur_pod.containers.push(des_c.clone());
                changed = true;
            }
        }
    }
    changed
}

fn merge_container(cur: &mut Container, des: &Container) -> bool {
    let mut changed = assign(&mut cur.image, &des.image);
    changed |= assign(&mut cur.ports, &des.ports);
    changed |= assign(&mut cur.env, &des.env);
    changed |= assign_probe(&mut cur.liveness_probe, &des.liveness_probe);
    changed |= assign_probe(&mut cur.readiness_probe, &des.readiness_probe);
    changed |= assign(&mut cur.security_context, &des.security_context);
    changed
}

fn assign_probe(current: &mut Option<Probe>, desired: &Option<Probe>) -> bool {
    if normalize_probe(current) == normalize_probe(desired) {
        false
    } else {
        *current = desired.clone();
        true
    }
}

/// The API server omits a zero `initialDelaySeconds`; absent and 0 are equal.
fn normalize_probe(probe: &Option<Probe>) -> Option<Probe> {
    probe.clone().map(|mut p| {
        if p.initial_delay_seconds == Some(0) {
            p.initial_delay_seconds = None;
        }
        p
    })
}
