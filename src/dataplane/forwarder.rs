//! IPv4 forwarding decision
//!
//! The forwarder is pure: it reads the routing table and neighbor cache and
//! tells the router what to do with one datagram. Queueing, ICMP
//! construction and framing happen in the router.

use crate::dataplane::{ArpTable, IcmpKind, RoutingTable};
use crate::protocol::icmp::IcmpPacket;
use crate::protocol::ipv4::{Ipv4Header, Ipv4Packet, Protocol};
use crate::protocol::MacAddr;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

/// Why a datagram was discarded without a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    BadChecksum,
    /// Route points back out the ingress interface
    SameInterface,
    /// Addressed to us but nothing handles the protocol
    LocalConsumed,
    /// Broadcast or multicast destination
    NotUnicast,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::Malformed => "malformed header",
            DropReason::BadChecksum => "bad header checksum",
            DropReason::SameInterface => "egress equals ingress",
            DropReason::LocalConsumed => "local protocol not handled",
            DropReason::NotUnicast => "broadcast or multicast destination",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone)]
pub enum ForwardAction {
    /// Neighbor known: frame and transmit
    Forward {
        interface: String,
        next_hop_mac: MacAddr,
        packet: Vec<u8>,
    },
    /// Neighbor unknown: queue behind an ARP resolution
    Resolve {
        interface: String,
        next_hop: Ipv4Addr,
        packet: Vec<u8>,
    },
    /// Answer the sender. `trigger` is the datagram as it stands after the
    /// TTL decrement and checksum update.
    Icmp { kind: IcmpKind, trigger: Ipv4Packet },
    Drop(DropReason),
}

/// Addressing of one router interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub ip_addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub mac_addr: MacAddr,
}

impl InterfaceInfo {
    pub fn broadcast_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip_addr) | !u32::from(self.mask))
    }
}

#[derive(Debug, Default)]
pub struct Forwarder {
    interfaces: BTreeMap<String, InterfaceInfo>,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_interface(&mut self, name: String, info: InterfaceInfo) {
        self.interfaces.insert(name, info);
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceInfo> {
        self.interfaces.get(name)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = (&String, &InterfaceInfo)> {
        self.interfaces.iter()
    }

    pub fn is_local(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.values().any(|info| info.ip_addr == addr)
    }

    /// Limited broadcast, multicast, or the broadcast address of one of our
    /// subnets. Such datagrams are never routed.
    pub fn is_link_scoped(&self, addr: Ipv4Addr) -> bool {
        addr.is_broadcast()
            || addr.is_multicast()
            || self.interfaces.values().any(|info| info.broadcast_addr() == addr)
    }

    /// Decide the fate of an IPv4 datagram received on `ingress`.
    ///
    /// Order matters: checksum, TTL, local delivery, then route lookup and
    /// neighbor resolution.
    pub fn forward(
        &self,
        data: &[u8],
        ingress: &str,
        routes: &RoutingTable,
        arp: &ArpTable,
    ) -> ForwardAction {
        let header = match Ipv4Header::parse(data) {
            Ok(h) => h,
            Err(_) => return ForwardAction::Drop(DropReason::Malformed),
        };
        if !header.verify_checksum() {
            return ForwardAction::Drop(DropReason::BadChecksum);
        }
        if self.is_link_scoped(header.dst_addr()) {
            return ForwardAction::Drop(DropReason::NotUnicast);
        }

        let mut packet = match Ipv4Packet::from_bytes(data) {
            Ok(p) => p,
            Err(_) => return ForwardAction::Drop(DropReason::Malformed),
        };
        let ttl = packet.decrement_ttl();
        packet.update_checksum();

        if ttl == 0 {
            return ForwardAction::Icmp {
                kind: IcmpKind::TimeExceeded,
                trigger: packet,
            };
        }

        let dst = packet.dst_addr();
        if self.is_local(dst) {
            return local_delivery(packet);
        }

        let route = match routes.lookup(dst) {
            Some(r) => r,
            None => {
                return ForwardAction::Icmp {
                    kind: IcmpKind::NetUnreachable,
                    trigger: packet,
                }
            }
        };
        if route.interface == ingress {
            return ForwardAction::Drop(DropReason::SameInterface);
        }

        let next_hop = route.next_hop.unwrap_or(dst);
        match arp.lookup(next_hop) {
            Some(next_hop_mac) => ForwardAction::Forward {
                interface: route.interface.clone(),
                next_hop_mac,
                packet: packet.into_bytes(),
            },
            None => ForwardAction::Resolve {
                interface: route.interface.clone(),
                next_hop,
                packet: packet.into_bytes(),
            },
        }
    }
}

fn local_delivery(packet: Ipv4Packet) -> ForwardAction {
    match Protocol::from_u8(packet.protocol()) {
        Some(Protocol::Udp) | Some(Protocol::Tcp) => ForwardAction::Icmp {
            kind: IcmpKind::PortUnreachable,
            trigger: packet,
        },
        Some(Protocol::Icmp) => {
            let is_echo = IcmpPacket::parse(packet.payload())
                .map(|icmp| icmp.is_echo_request())
                .unwrap_or(false);
            if is_echo {
                ForwardAction::Icmp {
                    kind: IcmpKind::EchoReply,
                    trigger: packet,
                }
            } else {
                ForwardAction::Drop(DropReason::LocalConsumed)
            }
        }
        None => ForwardAction::Drop(DropReason::LocalConsumed),
    }
}
