#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use nasha_controller_core as core;
pub use nasha_controller_k8s as k8s;
pub use nasha_controller_ovh as ovh;
pub use nasha_route_fixer as routes;

mod args;

pub use self::args::{Args, Mode};
