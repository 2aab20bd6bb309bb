//! Membership event sources.
//!
//! Both sources send events in the order they are observed and stop when the reconciler drops its
//! end of the channel.

use crate::{node, watcher::Event, Node, Nodes, ResourceExt};
use futures::prelude::*;
use nasha_controller_core::{membership::Tracker, MembershipEvent};
use std::future::Future;
use tokio::{
    sync::mpsc,
    time::{self, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Translates a `Node` watch into membership events.
///
/// A watch restart relists every node; members that disappeared while the watch was down leave
/// when the relist completes. Returns when the watch ends.
pub async fn nodes<S>(watch: S, events: mpsc::Sender<MembershipEvent>)
where
    S: Stream<Item = Event<Node>>,
{
    tokio::pin!(watch);
    let mut tracker = Tracker::default();
    while let Some(event) = watch.next().await {
        let changes = match event {
            Event::Init => {
                debug!("Listing nodes");
                tracker.begin_relist();
                vec![]
            }
            Event::InitApply(node) | Event::Apply(node) => node::observe(&mut tracker, &node),
            Event::InitDone => {
                let changes = tracker.end_relist();
                info!(members = tracker.len(), "Nodes listed");
                changes
            }
            Event::Delete(node) => tracker.remove(&node.name_any()).into_iter().collect(),
        };

        if !send_all(&events, changes).await {
            return;
        }
    }
    debug!("Node watch ended");
}

/// Lists nodes every `interval`, sending the difference from the previous list as events.
///
/// A failed list is skipped. Returns when `shutdown` completes. `interval` must be non-zero.
pub async fn poll<F: Future>(
    nodes: Nodes,
    interval: Duration,
    events: mpsc::Sender<MembershipEvent>,
    shutdown: F,
) {
    tokio::pin!(shutdown);
    let mut timer = time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = Tracker::default();
    loop {
        tokio::select! {
            _ = timer.tick() => match nodes.list().await {
                Ok(list) => {
                    let changes = node::relist(&mut tracker, &list);
                    debug!(members = tracker.len(), changes = changes.len(), "Nodes listed");
                    if !send_all(&events, changes).await {
                        return;
                    }
                }
                Err(error) => error!(%error, "Failed to list nodes"),
            },
            _release = &mut shutdown => {
                debug!("Shutting down");
                return;
            }
        }
    }
}

/// Returns false if the reconciler is gone.
async fn send_all(events: &mpsc::Sender<MembershipEvent>, changes: Vec<MembershipEvent>) -> bool {
    for change in changes {
        if events.send(change).await.is_err() {
            debug!("Membership events receiver dropped");
            return false;
        }
    }
    true
}
