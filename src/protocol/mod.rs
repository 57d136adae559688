//! Wire formats
//!
//! Parsers and builders for every frame the router touches, from the
//! Ethernet header up to RIPv2 route entries.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod rip;
pub mod types;
pub mod udp;

pub use types::*;
