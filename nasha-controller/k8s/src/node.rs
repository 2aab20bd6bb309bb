//! Node -> Member

use crate::{Api, Client, Node, ResourceExt};
use anyhow::Result;
use kube::api::ListParams;
use nasha_controller_core::{membership::Tracker, Member, Membership, MembershipEvent};
use std::net::IpAddr;
use tracing::{debug, warn};

const CONTROL_PLANE_ROLES: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// How a `Node` maps to cluster membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Member(Member),

    /// Control plane nodes are never granted access.
    ControlPlane,

    /// The node reports no usable address.
    Unresolved,
}

/// Lists cluster members from the Kubernetes API.
#[derive(Clone)]
pub struct Nodes {
    api: Api<Node>,
}

/// Resolves a node's membership.
///
/// The node's external address is preferred, falling back to its internal address.
pub fn resolve(node: &Node) -> Resolution {
    let labels = node.labels();
    if CONTROL_PLANE_ROLES.iter().any(|r| labels.contains_key(*r)) {
        return Resolution::ControlPlane;
    }

    let address = address_of_type(node, "ExternalIP").or_else(|| address_of_type(node, "InternalIP"));
    match address {
        Some(address) => Resolution::Member(Member::new(node.name_any(), address)),
        None => Resolution::Unresolved,
    }
}

fn address_of_type(node: &Node, kind: &str) -> Option<IpAddr> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .filter(|a| a.type_ == kind)
        .find_map(|a| match a.address.parse() {
            Ok(addr) => Some(addr),
            Err(error) => {
                debug!(node = %node.name_any(), address = %a.address, %error, "Invalid node address");
                None
            }
        })
}

/// Feeds an observed node through the tracker.
pub(crate) fn observe(tracker: &mut Tracker, node: &Node) -> Vec<MembershipEvent> {
    let name = node.name_any();
    match resolve(node) {
        Resolution::Member(member) => tracker.apply(member),
        Resolution::ControlPlane => {
            debug!(node = %name, "Ignoring control plane node");
            tracker.remove(&name).into_iter().collect()
        }
        Resolution::Unresolved => {
            warn!(node = %name, "Node has no external or internal address");
            tracker.retain(&name);
            vec![]
        }
    }
}

/// Feeds a complete node list through the tracker, removing members that are no longer listed.
pub(crate) fn relist(tracker: &mut Tracker, nodes: &[Node]) -> Vec<MembershipEvent> {
    tracker.begin_relist();
    let mut changes = nodes
        .iter()
        .flat_map(|node| observe(tracker, node))
        .collect::<Vec<_>>();
    changes.extend(tracker.end_relist());
    changes
}

/// Returns the resolved members of a node list, in list order.
pub(crate) fn members(nodes: &[Node]) -> Vec<Member> {
    nodes
        .iter()
        .filter_map(|node| match resolve(node) {
            Resolution::Member(member) => Some(member),
            Resolution::ControlPlane => None,
            Resolution::Unresolved => {
                warn!(node = %node.name_any(), "Node has no external or internal address");
                None
            }
        })
        .collect()
}

// === impl Nodes ===

impl Nodes {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    pub async fn list(&self) -> Result<Vec<Node>> {
        let nodes = self.api.list(&ListParams::default()).await?;
        Ok(nodes.items)
    }
}

#[async_trait::async_trait]
impl Membership for Nodes {
    async fn members(&self) -> Result<Vec<Member>> {
        let nodes = self.list().await?;
        Ok(members(&nodes))
    }
}
