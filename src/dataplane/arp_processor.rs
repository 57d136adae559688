//! ARP packet handling and next-hop resolution
//!
//! [`process_arp`] classifies one incoming ARP packet. [`ArpPendingQueue`]
//! holds datagrams waiting for a next hop to resolve and drives the
//! request retransmissions for every outstanding next hop from a single
//! deadline scheduler.

use crate::dataplane::ArpTable;
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::MacAddr;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Outcome of one incoming ARP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArpAction {
    /// Not for us
    None,
    /// Answer with this reply out the ingress interface
    Reply(ArpPacket),
    /// A reply taught us a binding; flush anything waiting on it
    Learned { ip: Ipv4Addr, mac: MacAddr },
}

/// Requests are answered for any of the router's addresses, not only the
/// ingress interface's. Only replies populate the cache.
pub fn process_arp(
    packet: &ArpPacket,
    table: &mut ArpTable,
    ingress_mac: MacAddr,
    is_own_address: impl Fn(Ipv4Addr) -> bool,
) -> ArpAction {
    match packet.operation {
        ArpOp::Request if is_own_address(packet.target_ip) => {
            ArpAction::Reply(ArpPacket::reply_to(packet, ingress_mac))
        }
        ArpOp::Request => ArpAction::None,
        ArpOp::Reply => {
            table.learn(packet.sender_ip, packet.sender_mac);
            ArpAction::Learned {
                ip: packet.sender_ip,
                mac: packet.sender_mac,
            }
        }
    }
}

/// Retry policy for unresolved next hops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpResolution {
    /// Gap between successive requests
    pub retry_interval: Duration,
    /// Requests sent before giving up
    pub max_requests: u32,
    /// Datagrams held per next hop; extras are dropped
    pub queue_limit: usize,
}

impl Default for ArpResolution {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_requests: 3,
            queue_limit: 64,
        }
    }
}

/// Who a queued datagram belongs to, which decides what happens when
/// resolution fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOrigin {
    /// Transit traffic; its sender gets Host Unreachable on failure
    Forwarded { ingress: String },
    /// Generated by the router itself; silently dropped on failure
    Local,
}

/// An IPv4 datagram ready to be framed once its next hop resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPacket {
    pub packet: Vec<u8>,
    pub origin: PacketOrigin,
}

#[derive(Debug)]
struct PendingEntry {
    interface: String,
    queue: VecDeque<PendingPacket>,
    requests_sent: u32,
    next_attempt: Instant,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// First datagram for this next hop; send the first request now
    NewResolution,
    /// Joined an outstanding resolution
    Queued,
    /// Queue for this next hop is full; datagram dropped
    Overflow,
}

/// What the scheduler decided for a next hop whose deadline passed
#[derive(Debug, PartialEq, Eq)]
pub enum ResolutionEvent {
    /// Still unresolved; broadcast another request
    Retry {
        next_hop: Ipv4Addr,
        interface: String,
    },
    /// The cache learned the binding some other way; transmit the queue
    Resolved {
        next_hop: Ipv4Addr,
        interface: String,
        mac: MacAddr,
        packets: Vec<PendingPacket>,
    },
    /// Budget spent; the queue is handed back in arrival order
    Failed {
        next_hop: Ipv4Addr,
        interface: String,
        packets: Vec<PendingPacket>,
    },
}

/// Datagrams waiting on ARP, keyed by next-hop address. At most one
/// resolution runs per next hop.
#[derive(Debug, Default)]
pub struct ArpPendingQueue {
    pending: HashMap<Ipv4Addr, PendingEntry>,
    policy: ArpResolution,
}

impl ArpPendingQueue {
    pub fn new(policy: ArpResolution) -> Self {
        Self {
            pending: HashMap::new(),
            policy,
        }
    }

    /// Queue a datagram behind `next_hop`. A new resolution counts its
    /// first request as sent at `now`.
    pub fn enqueue(
        &mut self,
        next_hop: Ipv4Addr,
        interface: &str,
        packet: PendingPacket,
        now: Instant,
    ) -> Enqueued {
        if let Some(entry) = self.pending.get_mut(&next_hop) {
            if entry.queue.len() >= self.policy.queue_limit {
                return Enqueued::Overflow;
            }
            entry.queue.push_back(packet);
            return Enqueued::Queued;
        }

        self.pending.insert(
            next_hop,
            PendingEntry {
                interface: interface.to_string(),
                queue: VecDeque::from([packet]),
                requests_sent: 1,
                next_attempt: now + self.policy.retry_interval,
            },
        );
        Enqueued::NewResolution
    }

    /// Stop resolving `next_hop` and hand back its egress interface and
    /// queue. Returns None when nothing was pending, so repeated calls are
    /// harmless.
    pub fn take(&mut self, next_hop: Ipv4Addr) -> Option<(String, Vec<PendingPacket>)> {
        self.pending
            .remove(&next_hop)
            .map(|entry| (entry.interface, entry.queue.into()))
    }

    /// Fire every deadline that has passed. Events come out ordered by
    /// next-hop address.
    pub fn poll(
        &mut self,
        now: Instant,
        resolve: impl Fn(Ipv4Addr) -> Option<MacAddr>,
    ) -> Vec<ResolutionEvent> {
        let mut due: Vec<Ipv4Addr> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.next_attempt <= now)
            .map(|(ip, _)| *ip)
            .collect();
        due.sort();

        let mut events = Vec::with_capacity(due.len());
        for next_hop in due {
            if let Some(mac) = resolve(next_hop) {
                if let Some((interface, packets)) = self.take(next_hop) {
                    events.push(ResolutionEvent::Resolved {
                        next_hop,
                        interface,
                        mac,
                        packets,
                    });
                }
                continue;
            }

            let Some(entry) = self.pending.get_mut(&next_hop) else {
                continue;
            };
            if entry.requests_sent >= self.policy.max_requests {
                if let Some((interface, packets)) = self.take(next_hop) {
                    events.push(ResolutionEvent::Failed {
                        next_hop,
                        interface,
                        packets,
                    });
                }
            } else {
                entry.requests_sent += 1;
                entry.next_attempt = now + self.policy.retry_interval;
                events.push(ResolutionEvent::Retry {
                    next_hop,
                    interface: entry.interface.clone(),
                });
            }
        }
        events
    }

    /// Next hops being resolved
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
