use std::sync::{Arc, Mutex, MutexGuard};

use flume::TrySendError;
use tracing::{trace, warn};

use super::{
    MembershipListener, MembershipSnapshot, MembershipState,
    MembershipStateChanged,
};
use crate::resources::ClusterKey;

/// Owns the membership snapshot of one cluster and republishes every change
/// as a trigger for that cluster's key.
///
/// The client invokes [`on_membership_changed`](Self::on_membership_changed)
/// from its own task while reconcile passes read [`snapshot`](Self::snapshot);
/// the mutex below is the only synchronization between them.
#[derive(Debug)]
pub struct MembershipBridge {
    key: ClusterKey,
    members: Mutex<MembershipSnapshot>,
    triggers: flume::Sender<ClusterKey>,
}

impl MembershipBridge {
    pub fn new(key: ClusterKey, triggers: flume::Sender<ClusterKey>) -> Self {
        Self {
            key,
            members: Mutex::new(MembershipSnapshot::new()),
            triggers,
        }
    }

    pub fn key(&self) -> &ClusterKey {
        &self.key
    }

    fn lock(&self) -> MutexGuard<'_, MembershipSnapshot> {
        // the map stays consistent even if a holder panicked: every update
        // is a single insert or remove
        self.members.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on_membership_changed(&self, event: MembershipStateChanged) {
        let mut members = self.lock();
        let id = event.member.id();
        match event.state {
            MembershipState::Added => {
                members.insert(id, true);
            }
            MembershipState::Removed => {
                members.remove(&id);
            }
        }
        // never blocks: a full channel already holds a wake-up for this key
        match self.triggers.try_send(self.key.clone()) {
            Ok(()) => {
                trace!(cluster = %self.key, member = %event.member, state = ?event.state, "membership trigger queued")
            }
            Err(TrySendError::Full(_)) => {
                trace!(cluster = %self.key, member = %event.member, "membership trigger coalesced")
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(cluster = %self.key, member = %event.member, "membership trigger dropped: no receiver")
            }
        }
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        self.lock().clone()
    }

    /// Callback to hand to a cluster client.
    pub fn listener(self: &Arc<Self>) -> MembershipListener {
        let bridge = Arc::clone(self);
        Arc::new(move |event: MembershipStateChanged| {
            bridge.on_membership_changed(event)
        })
    }
}
