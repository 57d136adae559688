//! Neighbor cache (IPv4 to MAC)
//!
//! Entries never expire. They are created by ARP replies, by interface
//! registration and by static configuration.

use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpEntryKind {
    /// Learned from an ARP reply
    Dynamic,
    /// One of our own interface addresses
    Local,
    /// Configured by the operator
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntry {
    pub mac: MacAddr,
    pub kind: ArpEntryKind,
}

#[derive(Debug, Default)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, ArpEntry>,
}

impl ArpTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding learned from the wire. Local and static entries are
    /// left alone.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        match self.entries.get(&ip) {
            Some(entry) if entry.kind != ArpEntryKind::Dynamic => {}
            _ => {
                self.entries.insert(
                    ip,
                    ArpEntry {
                        mac,
                        kind: ArpEntryKind::Dynamic,
                    },
                );
            }
        }
    }

    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr, kind: ArpEntryKind) {
        self.entries.insert(ip, ArpEntry { mac, kind });
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.get(&ip).map(|e| e.mac)
    }

    /// Snapshot sorted by address
    pub fn entries(&self) -> Vec<(Ipv4Addr, ArpEntry)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(ip, e)| (*ip, *e)).collect();
        entries.sort_by_key(|(ip, _)| *ip);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
