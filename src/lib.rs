//! Ripster - userspace IPv4 router
//!
//! Forwards IPv4 between Ethernet interfaces, resolves next hops with ARP,
//! answers with ICMP and learns routes from neighbours over RIPv2.
//! Every protocol above the raw socket is implemented in this crate.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod telemetry;

pub use error::{Error, Result};
