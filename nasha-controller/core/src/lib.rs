//! NAS-HA access reconciliation
//!
//! A NAS-HA partition is protected by an IP access list held by the OVH API. The reconciler keeps
//! that list in step with the set of cluster members:
//!
//! - Every resolved member address must hold a read-write entry on every partition.
//! - An _exclusive_ partition must hold no other entries. Non-exclusive partitions may accrete
//!   entries for members that left while the controller was not watching.
//!
//! ```text
//! [ Membership ] -> [ MembershipEvent ] -> [ Reconciler ] -> [ AccessStore ]
//!                                               ^
//!                                         [ ResourceSet ]
//! ```
//!
//! State is never cached between passes: each pass observes the membership, the partition list
//! and the access lists it needs, plans the difference, and applies it.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod membership;
pub mod metrics;
pub mod plan;
mod reconcile;
pub mod resource;
pub mod store;


pub use self::{
    membership::{Member, Membership, MembershipEvent},
    metrics::Metrics,
    plan::Plan,
    reconcile::Reconciler,
    resource::{Resource, ResourceRef, ResourceSet},
    store::{AccessEntry, AccessMode, AccessStore},
};
pub use ipnet::IpNet;
