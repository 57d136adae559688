//! Data plane components
//!
//! Forwarding decisions, neighbor resolution, ICMP and RIP. Nothing in here
//! touches a socket; the router returns frames for the runtime to send.

mod arp_processor;
mod arp_table;
mod forwarder;
pub mod icmp_generator;
mod rip;
mod router;
pub mod routing;

pub use arp_processor::{
    process_arp, ArpAction, ArpPendingQueue, ArpResolution, Enqueued, PacketOrigin,
    PendingPacket, ResolutionEvent,
};
pub use arp_table::{ArpEntry, ArpEntryKind, ArpTable};
pub use forwarder::{DropReason, ForwardAction, Forwarder, InterfaceInfo};
pub use icmp_generator::IcmpKind;
pub use rip::{RipEngine, RipRoute, RipTimers};
pub use router::{Outbound, Router, RouterSettings};
pub use routing::{Route, RouteSource, RoutingTable};
