use crate::{
    metrics::{Metrics, Op},
    resource, AccessMode, AccessStore, Member, Membership, MembershipEvent, Plan, Resource,
    ResourceSet,
};
use anyhow::Result;
use ipnet::IpNet;
use std::future::Future;
use tokio::{
    sync::mpsc,
    time::{self, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info, info_span, instrument, Instrument};

/// Drives partition access lists toward the current cluster membership.
///
/// Passes run one at a time, and each pass reads a single `ResourceSet` snapshot.
pub struct Reconciler<S, M> {
    store: S,
    membership: M,
    resources: resource::Receiver,
    metrics: Metrics,
}

impl<S: AccessStore, M: Membership> Reconciler<S, M> {
    pub fn new(store: S, membership: M, resources: resource::Receiver, metrics: Metrics) -> Self {
        Self {
            store,
            membership,
            resources,
            metrics,
        }
    }

    /// Removes entries for non-members from exclusive partitions.
    ///
    /// Non-exclusive partitions are left untouched.
    #[instrument(skip(self))]
    pub async fn startup_cleanup(&self) {
        let resources = self.snapshot();
        if resources.exclusive().next().is_none() {
            debug!("No exclusive partitions");
            return;
        }

        let members = match self.member_addresses().await {
            Ok(members) => members,
            Err(error) => {
                error!(%error, "Failed to list members; skipping cleanup");
                return;
            }
        };

        for resource in resources.exclusive() {
            let Some(present) = self.present(resource).await else {
                continue;
            };
            let plan = Plan::revoke_stale(&members, &present);
            self.apply(resource, plan).await;
        }
    }

    /// Grants `member` access to every partition it cannot reach yet.
    #[instrument(skip_all, fields(member = %member.name, addr = %member.address))]
    pub async fn member_joined(&self, member: &Member) {
        info!("Member joined");
        let addr = [IpNet::from(member.address)];
        for resource in &self.snapshot() {
            let present = self.observe(resource, &addr).await;
            self.apply(resource, Plan::grant_missing(&addr, &present))
                .await;
        }
    }

    /// Revokes `member`'s access to every partition.
    #[instrument(skip_all, fields(member = %member.name, addr = %member.address))]
    pub async fn member_left(&self, member: &Member) {
        info!("Member left");
        let addr = [IpNet::from(member.address)];
        for resource in &self.snapshot() {
            let present = self.observe(resource, &addr).await;
            self.apply(resource, Plan::revoke_stale(&[], &present)).await;
        }
    }

    /// Grants every member access to every partition after the partition list was replaced.
    ///
    /// Refreshes never revoke: removals are driven by members leaving.
    #[instrument(skip(self))]
    pub async fn refresh(&self) {
        let resources = self.snapshot();
        info!(partitions = resources.len(), "Partitions reloaded");
        let members = match self.member_addresses().await {
            Ok(members) => members,
            Err(error) => {
                error!(%error, "Failed to list members; skipping refresh");
                return;
            }
        };

        for resource in &resources {
            let present = self.observe(resource, &members).await;
            self.apply(resource, Plan::grant_missing(&members, &present))
                .await;
        }
    }

    /// Makes every partition's access list hold exactly the current members, regardless of
    /// exclusivity.
    #[instrument(skip(self))]
    pub async fn full_poll(&self) {
        let members = match self.member_addresses().await {
            Ok(members) => members,
            Err(error) => {
                error!(%error, "Failed to list members; skipping poll");
                return;
            }
        };

        for resource in &self.snapshot() {
            let Some(present) = self.present(resource).await else {
                continue;
            };
            self.apply(resource, Plan::converge(&members, &present)).await;
        }
    }

    /// Processes membership events until the event channel closes.
    ///
    /// Partition reloads are processed between events and trigger a refresh.
    pub async fn run(self, mut events: mpsc::Receiver<MembershipEvent>) {
        let mut reloads = self.resources.clone();
        let mut reloading = true;
        loop {
            tokio::select! {
                biased;

                res = reloads.changed(), if reloading => {
                    if res.is_err() {
                        debug!("Partition list publisher dropped");
                        reloading = false;
                        continue;
                    }
                    self.refresh().await;
                }

                ev = events.recv() => match ev {
                    Some(MembershipEvent::Joined(member)) => self.member_joined(&member).await,
                    Some(MembershipEvent::Left(member)) => self.member_left(&member).await,
                    None => {
                        debug!("Membership events closed");
                        return;
                    }
                },
            }
        }
    }

    /// Runs a full poll every `interval` until `shutdown` completes.
    ///
    /// A pass always runs to completion; shutdown is only observed between passes. `interval`
    /// must be non-zero.
    pub async fn run_full_poll<F: Future>(self, interval: Duration, shutdown: F) {
        tokio::pin!(shutdown);
        let mut timer = time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.full_poll().instrument(info_span!("poll")).await;
                }
                _release = &mut shutdown => {
                    debug!("Shutting down");
                    return;
                }
            }
        }
    }

    fn snapshot(&self) -> ResourceSet {
        self.resources.borrow().clone()
    }

    async fn member_addresses(&self) -> Result<Vec<IpNet>> {
        let members = self.membership.members().await.inspect_err(|_| {
            self.metrics.failed(Op::Members);
        })?;
        debug!(members = members.len(), "Listed members");
        Ok(members.into_iter().map(|m| IpNet::from(m.address)).collect())
    }

    /// Returns the host blocks of `candidates` that hold an entry on `resource`.
    async fn observe(&self, resource: &Resource, candidates: &[IpNet]) -> Vec<IpNet> {
        let mut present = Vec::with_capacity(candidates.len());
        for &addr in candidates {
            if self.store.exists(&resource.id, addr.addr()).await {
                present.push(addr);
            } else {
                debug!(partition = %resource.id, %addr, "Not in access list");
            }
        }
        present
    }

    /// Returns the blocks held by `resource`'s access list, or `None` if it can't be listed.
    async fn present(&self, resource: &Resource) -> Option<Vec<IpNet>> {
        match self.store.list(&resource.id).await {
            Ok(blocks) => Some(blocks),
            Err(error) => {
                self.metrics.failed(Op::List);
                error!(partition = %resource.id, %error, "Failed to list access");
                None
            }
        }
    }

    async fn apply(&self, resource: &Resource, Plan { grant, revoke }: Plan) {
        let id = &resource.id;
        for block in grant {
            match self.store.create(id, block, AccessMode::ReadWrite).await {
                Ok(()) => {
                    self.metrics.granted();
                    info!(partition = %id, %block, "Granted access");
                }
                Err(error) => {
                    self.metrics.failed(Op::Create);
                    error!(partition = %id, %block, %error, "Failed to grant access");
                }
            }
        }

        for block in revoke {
            match self.store.delete(id, block).await {
                Ok(()) => {
                    self.metrics.revoked();
                    info!(partition = %id, %block, "Revoked access");
                }
                Err(error) => {
                    self.metrics.failed(Op::Delete);
                    error!(partition = %id, %block, %error, "Failed to revoke access");
                }
            }
        }
    }
}
