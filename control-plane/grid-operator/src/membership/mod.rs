//! Cluster membership as reported by the grid's own client protocol.
//!
//! A [`MembershipBridge`] per cluster keeps the authoritative snapshot and
//! turns every change into a reconcile trigger. [`ClusterContexts`] owns the
//! bridge together with the client feeding it, for as long as the cluster
//! is managed.

pub mod bridge;
pub mod client;
pub mod context;
pub mod rest;

use std::collections::BTreeMap;
use std::fmt;

pub use bridge::MembershipBridge;
pub use client::{
    ClientConfig, ClientError, ClusterClient, ClusterClientFactory,
    MembershipListener,
};
pub use context::{ClusterContext, ClusterContexts};
pub use rest::{RestClientFactory, RestMembershipClient, parse_member_list};

/// Member identity to presence.
pub type MembershipSnapshot = BTreeMap<String, bool>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberInfo {
    /// `host:port` the member listens on.
    pub address: String,
    pub uuid: String,
}

impl MemberInfo {
    pub fn new(address: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            uuid: uuid.into(),
        }
    }

    /// Stable identity used as the snapshot key.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member {} - {}", self.address, self.uuid)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipState {
    Added,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipStateChanged {
    pub member: MemberInfo,
    pub state: MembershipState,
}

impl MembershipStateChanged {
    pub fn added(member: MemberInfo) -> Self {
        Self {
            member,
            state: MembershipState::Added,
        }
    }

    pub fn removed(member: MemberInfo) -> Self {
        Self {
            member,
            state: MembershipState::Removed,
        }
    }
}
