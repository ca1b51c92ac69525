use kube::runtime::events::{Event, EventType, Recorder};
use kube::Resource;
use tracing::debug;

use crate::crd::GridCluster;

pub const REASON_CREATED: &str = "Created";
pub const REASON_UPDATED: &str = "Updated";
pub const REASON_TORN_DOWN: &str = "TornDown";
pub const REASON_INVALID: &str = "InvalidSpec";

pub async fn emit_event(
    recorder: &Recorder,
    cluster: &GridCluster,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    let reference = cluster.object_ref(&());
    if let Err(e) = recorder
        .publish(
            &Event {
                type_,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            },
            &reference,
        )
        .await
    {
        // events are best effort
        debug!(error = %e, reason, "failed to publish event");
    }
}
