//! Keeps NAS-HA traffic on the public gateway.
//!
//! Partition access lists grant a node's public address, so traffic to a NAS-HA service must not
//! leave through a private network. For every partition's service address, the enforcer checks
//! the route the kernel would use and installs a host route via the public gateway when the next
//! hop differs.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod enforce;
mod ip;


pub use self::{
    args::Args,
    enforce::{Enforcer, RouteTable},
    ip::IpRoute,
};
