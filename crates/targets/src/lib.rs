//! Target Model - CIDR decomposition, spray sampling, and port expansion.
//!
//! Takes the user's target and port expressions and turns them into the
//! deduplicated, deterministic structures the scan controller consumes.

pub mod cidr;
pub mod ports;

pub use cidr::{host_count, hosts, spray_ips, sub_cidrs, unique, TargetSet};
pub use ports::{expand_ports, expand_port_tokens, PortPlan};
