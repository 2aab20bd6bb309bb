//! Kubernetes bindings for the NAS-HA access controller.
//!
//! Cluster members are the `Node`s that are not part of the control plane. Membership changes are
//! read from a `Node` watch (or a periodic `Node` list) and delivered to the reconciler as
//! `MembershipEvent`s. The partition list may be served from a `ConfigMap`.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config_map;
pub mod node;
pub mod watch;

#[cfg(test)]
mod tests;

pub use self::node::{Nodes, Resolution};
pub use k8s_openapi::api::core::v1::{ConfigMap, Node, NodeAddress, NodeStatus};
pub use kube::{
    api::{Api, ObjectMeta, ResourceExt},
    runtime::watcher,
    Client,
};
