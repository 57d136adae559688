//! ICMP messages the router originates

use crate::protocol::icmp::{
    build_echo_reply, build_error, dest_unreachable, time_exceeded, IcmpPacket, IcmpType,
};
use crate::protocol::ipv4::{Ipv4Builder, Ipv4Packet, Protocol, DEFAULT_TTL};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpKind {
    TimeExceeded,
    NetUnreachable,
    HostUnreachable,
    PortUnreachable,
    EchoReply,
}

impl IcmpKind {
    pub fn type_code(self) -> (IcmpType, u8) {
        match self {
            IcmpKind::TimeExceeded => (IcmpType::TimeExceeded, time_exceeded::TTL_EXCEEDED),
            IcmpKind::NetUnreachable => (
                IcmpType::DestinationUnreachable,
                dest_unreachable::NET_UNREACHABLE,
            ),
            IcmpKind::HostUnreachable => (
                IcmpType::DestinationUnreachable,
                dest_unreachable::HOST_UNREACHABLE,
            ),
            IcmpKind::PortUnreachable => (
                IcmpType::DestinationUnreachable,
                dest_unreachable::PORT_UNREACHABLE,
            ),
            IcmpKind::EchoReply => (IcmpType::EchoReply, 0),
        }
    }

    pub fn is_error(self) -> bool {
        self != IcmpKind::EchoReply
    }
}

fn is_unicast(addr: Ipv4Addr) -> bool {
    !(addr.is_unspecified() || addr.is_multicast() || addr.is_broadcast())
}

/// Errors are never sent about ICMP errors or about datagrams that were
/// not addressed from and to a single host.
fn may_report(trigger: &Ipv4Packet) -> bool {
    if !is_unicast(trigger.src_addr()) || !is_unicast(trigger.dst_addr()) {
        return false;
    }
    if trigger.protocol() != Protocol::Icmp as u8 {
        return true;
    }
    match IcmpPacket::parse(trigger.payload()) {
        Ok(icmp) => !icmp.message_type().is_some_and(IcmpType::is_error),
        Err(_) => true,
    }
}

/// Build the IPv4 datagram answering `trigger` with `kind`, sourced from
/// `source` and addressed to the trigger's sender.
///
/// Returns None when the trigger may not be answered.
pub fn generate(kind: IcmpKind, trigger: &Ipv4Packet, source: Ipv4Addr) -> Option<Vec<u8>> {
    let message = match kind {
        IcmpKind::EchoReply => build_echo_reply(trigger.payload()).ok()?,
        _ if !may_report(trigger) => return None,
        _ => {
            let (icmp_type, code) = kind.type_code();
            build_error(icmp_type, code, trigger.header(), trigger.payload())
        }
    };

    Some(
        Ipv4Builder::new()
            .ttl(DEFAULT_TTL)
            .protocol(Protocol::Icmp)
            .src_addr(source)
            .dst_addr(trigger.src_addr())
            .payload(&message)
            .build(),
    )
}
