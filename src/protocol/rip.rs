//! RIPv2 messages (RFC 2453)

use crate::{Error, Result};
use std::net::Ipv4Addr;

pub const RIP_PORT: u16 = 520;
pub const RIP_VERSION: u8 = 2;
/// All-RIP-routers group for unsolicited traffic
pub const RIP_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);
/// Metric meaning "unreachable"
pub const RIP_INFINITY: u32 = 16;

pub const HEADER_SIZE: usize = 4;
pub const ENTRY_SIZE: usize = 20;
/// Route entries allowed in one message
pub const MAX_ENTRIES: usize = 25;

pub const AFI_INET: u16 = 2;
/// AFI of the single entry in a whole-table request
pub const AFI_UNSPECIFIED: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RipCommand {
    Request = 1,
    Response = 2,
}

impl RipCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RipCommand::Request),
            2 => Some(RipCommand::Response),
            _ => None,
        }
    }
}

/// One 20-byte route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipEntry {
    pub afi: u16,
    pub route_tag: u16,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// 0.0.0.0 means "via the sender"
    pub next_hop: Ipv4Addr,
    pub metric: u32,
}

impl RipEntry {
    pub fn route(address: Ipv4Addr, mask: Ipv4Addr, metric: u32) -> Self {
        Self {
            afi: AFI_INET,
            route_tag: 0,
            address,
            mask,
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric,
        }
    }

    fn whole_table() -> Self {
        Self {
            afi: AFI_UNSPECIFIED,
            route_tag: 0,
            address: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric: RIP_INFINITY,
        }
    }

    fn parse(b: &[u8]) -> Self {
        Self {
            afi: u16::from_be_bytes([b[0], b[1]]),
            route_tag: u16::from_be_bytes([b[2], b[3]]),
            address: Ipv4Addr::new(b[4], b[5], b[6], b[7]),
            mask: Ipv4Addr::new(b[8], b[9], b[10], b[11]),
            next_hop: Ipv4Addr::new(b[12], b[13], b[14], b[15]),
            metric: u32::from_be_bytes([b[16], b[17], b[18], b[19]]),
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.afi.to_be_bytes());
        out.extend_from_slice(&self.route_tag.to_be_bytes());
        out.extend_from_slice(&self.address.octets());
        out.extend_from_slice(&self.mask.octets());
        out.extend_from_slice(&self.next_hop.octets());
        out.extend_from_slice(&self.metric.to_be_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipPacket {
    pub command: RipCommand,
    pub entries: Vec<RipEntry>,
}

impl RipPacket {
    /// Ask a neighbour for its entire table.
    pub fn whole_table_request() -> Self {
        Self {
            command: RipCommand::Request,
            entries: vec![RipEntry::whole_table()],
        }
    }

    pub fn response(entries: Vec<RipEntry>) -> Self {
        Self {
            command: RipCommand::Response,
            entries,
        }
    }

    pub fn is_whole_table_request(&self) -> bool {
        self.command == RipCommand::Request
            && matches!(
                self.entries.as_slice(),
                [entry] if entry.afi == AFI_UNSPECIFIED && entry.metric == RIP_INFINITY
            )
    }

    /// Only version 2 is accepted.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("RIP message too short".into()));
        }
        let command = RipCommand::from_u8(buffer[0])
            .ok_or_else(|| Error::Parse(format!("unknown RIP command {}", buffer[0])))?;
        if buffer[1] != RIP_VERSION {
            return Err(Error::Parse(format!("unsupported RIP version {}", buffer[1])));
        }

        let body = &buffer[HEADER_SIZE..];
        if body.len() % ENTRY_SIZE != 0 {
            return Err(Error::Parse(format!(
                "RIP body of {} bytes is not a whole number of entries",
                body.len()
            )));
        }

        let entries = body.chunks_exact(ENTRY_SIZE).map(RipEntry::parse).collect();
        Ok(Self { command, entries })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.entries.len() * ENTRY_SIZE);
        out.extend_from_slice(&[self.command as u8, RIP_VERSION, 0, 0]);
        for entry in &self.entries {
            entry.write_to(&mut out);
        }
        out
    }

    /// Split a full table into responses of at most [`MAX_ENTRIES`] each.
    /// An empty table still yields one (empty) response.
    pub fn responses(entries: Vec<RipEntry>) -> Vec<RipPacket> {
        if entries.is_empty() {
            return vec![RipPacket::response(Vec::new())];
        }
        entries
            .chunks(MAX_ENTRIES)
            .map(|chunk| RipPacket::response(chunk.to_vec()))
            .collect()
    }
}
