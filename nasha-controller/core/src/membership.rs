use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::Result;
use std::net::IpAddr;
use tracing::debug;

/// A cluster node with a resolved address.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub address: IpAddr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(Member),
    Left(Member),
}

/// Lists the current cluster members.
#[async_trait::async_trait]
pub trait Membership: Send + Sync {
    /// Returns every resolved member, in the order the cluster reports them.
    async fn members(&self) -> Result<Vec<Member>>;
}

/// Turns membership observations into join/leave events.
///
/// Both a watch stream and a periodic list feed observations through the tracker. A relist
/// (`begin_relist`, observations, `end_relist`) emits `Left` for every member that was not
/// observed, so a gap in a watch does not lose removals.
#[derive(Debug, Default)]
pub struct Tracker {
    members: HashMap<String, Member>,
    relist: Option<HashSet<String>>,
}

// === impl Member ===

impl Member {
    pub fn new(name: impl ToString, address: IpAddr) -> Self {
        Self {
            name: name.to_string(),
            address,
        }
    }
}

// === impl Tracker ===

impl Tracker {
    /// Records a resolved member.
    ///
    /// A member that changed address leaves with its old address before joining with the new one.
    pub fn apply(&mut self, member: Member) -> Vec<MembershipEvent> {
        self.mark(&member.name);
        match self.members.insert(member.name.clone(), member.clone()) {
            None => vec![MembershipEvent::Joined(member)],
            Some(prior) if prior.address == member.address => vec![],
            Some(prior) => {
                debug!(name = %member.name, from = %prior.address, to = %member.address, "Address changed");
                vec![MembershipEvent::Left(prior), MembershipEvent::Joined(member)]
            }
        }
    }

    /// Records that a node is no longer a member.
    pub fn remove(&mut self, name: &str) -> Option<MembershipEvent> {
        self.members.remove(name).map(MembershipEvent::Left)
    }

    /// Records that a node was observed without changing its membership.
    pub fn retain(&mut self, name: &str) {
        self.mark(name);
    }

    pub fn begin_relist(&mut self) {
        self.relist = Some(HashSet::new());
    }

    /// Ends a relist, removing every member that was not observed since it began.
    pub fn end_relist(&mut self) -> Vec<MembershipEvent> {
        let Some(seen) = self.relist.take() else {
            return vec![];
        };
        let gone = self
            .members
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect::<Vec<_>>();
        gone.into_iter()
            .filter_map(|name| self.remove(&name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn mark(&mut self, name: &str) {
        if let Some(seen) = self.relist.as_mut() {
            seen.insert(name.to_string());
        }
    }
}
