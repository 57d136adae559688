//! Packet dispatch
//!
//! The router ties the forwarder, ARP, ICMP and RIP together. Every entry
//! point takes `&self` and returns the frames to transmit as
//! `(interface, frame)` pairs; it never performs I/O. Shared state sits
//! behind std locks taken in a fixed order: RIP, routes, ARP table,
//! pending queue.

use crate::dataplane::icmp_generator::{self, IcmpKind};
use crate::dataplane::rip::{RipEngine, RipRoute, RipTimers};
use crate::dataplane::routing::{network, Route, RouteSource};
use crate::dataplane::{
    process_arp, ArpAction, ArpEntry, ArpEntryKind, ArpPendingQueue, ArpResolution, ArpTable,
    Enqueued, ForwardAction, Forwarder, InterfaceInfo, PacketOrigin, PendingPacket,
    ResolutionEvent, RoutingTable,
};
use crate::protocol::arp::ArpPacket;
use crate::protocol::ethernet::{Frame, FrameBuilder};
use crate::protocol::ipv4::{Ipv4Builder, Ipv4Header, Ipv4Packet, Protocol, DEFAULT_TTL};
use crate::protocol::rip::{RipCommand, RipEntry, RipPacket, RIP_MULTICAST, RIP_PORT};
use crate::protocol::udp::{UdpBuilder, UdpHeader};
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Frames to put on the wire, tagged with the egress interface
pub type Outbound = Vec<(String, Vec<u8>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    pub arp: ArpResolution,
    /// None disables RIP; port 520 is then ordinary traffic
    pub rip: Option<RipTimers>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            arp: ArpResolution::default(),
            rip: Some(RipTimers::default()),
        }
    }
}

pub struct Router {
    forwarder: Forwarder,
    routes: RwLock<RoutingTable>,
    arp_table: RwLock<ArpTable>,
    arp_pending: Mutex<ArpPendingQueue>,
    rip: Option<Mutex<RipEngine>>,
    /// IP identification for datagrams we originate
    next_ip_id: AtomicU16,
    metrics: Arc<MetricsRegistry>,
}

impl Router {
    pub fn new(metrics: Arc<MetricsRegistry>, settings: RouterSettings) -> Self {
        Self {
            forwarder: Forwarder::new(),
            routes: RwLock::new(RoutingTable::new()),
            arp_table: RwLock::new(ArpTable::new()),
            arp_pending: Mutex::new(ArpPendingQueue::new(settings.arp)),
            rip: settings.rip.map(|timers| Mutex::new(RipEngine::new(timers))),
            next_ip_id: AtomicU16::new(1),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Attach an interface. Installs the connected route, its RIP entry and
    /// a local ARP entry for the interface address.
    pub fn add_interface(&mut self, name: &str, mac_addr: MacAddr, ip_addr: Ipv4Addr, mask: Ipv4Addr) {
        self.forwarder.add_interface(
            name.to_string(),
            InterfaceInfo {
                ip_addr,
                mask,
                mac_addr,
            },
        );
        self.metrics.register_interface(name);
        if let Some(rip) = self.rip.as_mut() {
            rip.get_mut().unwrap().add_connected(ip_addr, mask, name);
        }

        {
            let mut routes = self.routes.write().unwrap();
            routes.add(Route::connected(ip_addr, mask, name));
            self.metrics.route_count.set(routes.len());
        }
        let mut arp = self.arp_table.write().unwrap();
        arp.insert(ip_addr, mac_addr, ArpEntryKind::Local);
        self.metrics.arp_table_size.set(arp.len());

        debug!(interface = name, %ip_addr, %mac_addr, "interface added");
    }

    /// Install an operator route. Its egress must be one of our interfaces.
    pub fn add_route(&self, route: Route) -> Result<()> {
        if self.forwarder.interface(&route.interface).is_none() {
            return Err(Error::InterfaceNotFound {
                name: route.interface,
            });
        }
        debug!(%route, "route added");
        let mut routes = self.routes.write().unwrap();
        routes.add(route);
        self.metrics.route_count.set(routes.len());
        Ok(())
    }

    pub fn add_static_arp(&self, ip: Ipv4Addr, mac: MacAddr) {
        let mut arp = self.arp_table.write().unwrap();
        arp.insert(ip, mac, ArpEntryKind::Static);
        self.metrics.arp_table_size.set(arp.len());
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceInfo> {
        self.forwarder.interface(name)
    }

    pub fn interface_names(&self) -> Vec<String> {
        self.forwarder.interfaces().map(|(name, _)| name.clone()).collect()
    }

    /// Forwarding table snapshot, longest prefix first
    pub fn routes(&self) -> Vec<Route> {
        self.routes.read().unwrap().routes().to_vec()
    }

    pub fn arp_entries(&self) -> Vec<(Ipv4Addr, ArpEntry)> {
        self.arp_table.read().unwrap().entries()
    }

    pub fn rip_routes(&self) -> Vec<RipRoute> {
        match &self.rip {
            Some(rip) => rip.lock().unwrap().routes().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn rip_timers(&self) -> Option<RipTimers> {
        self.rip.as_ref().map(|rip| *rip.lock().unwrap().timers())
    }

    /// Next hops currently being resolved
    pub fn pending_resolutions(&self) -> usize {
        self.arp_pending.lock().unwrap().len()
    }

    pub fn process_packet(&self, ingress: &str, frame: &[u8]) -> Outbound {
        self.process_packet_at(ingress, frame, Instant::now())
    }

    /// Handle one received Ethernet frame as if it arrived at `now`.
    pub fn process_packet_at(&self, ingress: &str, frame: &[u8], now: Instant) -> Outbound {
        let mut out = Vec::new();
        self.metrics.record_rx(ingress, frame.len());

        let Some(info) = self.forwarder.interface(ingress) else {
            warn!("frame on unknown interface {}", ingress);
            return out;
        };

        let eth = match Frame::parse(frame) {
            Ok(f) => f,
            Err(e) => {
                trace!("bad Ethernet frame on {}: {}", ingress, e);
                self.metrics.record_rx_error(ingress);
                return out;
            }
        };

        let dst_mac = eth.dst_mac();
        if dst_mac != info.mac_addr && !dst_mac.is_broadcast() && !dst_mac.is_multicast() {
            trace!("frame for {} ignored on {}", dst_mac, ingress);
            return out;
        }

        match EtherType::from_u16(eth.ethertype()) {
            Some(EtherType::Arp) => self.handle_arp(ingress, info, eth.payload(), &mut out),
            Some(EtherType::Ipv4) => {
                if self.is_rip_message(info, eth.payload()) {
                    self.handle_rip(ingress, info, eth.src_mac(), eth.payload(), now, &mut out);
                } else {
                    self.handle_ipv4(ingress, info, eth.payload(), now, &mut out);
                }
            }
            None => {
                trace!("unsupported EtherType 0x{:04x} on {}", eth.ethertype(), ingress);
                self.metrics.packets_dropped.inc();
            }
        }

        out
    }

    fn handle_arp(&self, ingress: &str, info: &InterfaceInfo, payload: &[u8], out: &mut Outbound) {
        let packet = match ArpPacket::parse(payload) {
            Ok(p) => p,
            Err(e) => {
                trace!("bad ARP packet on {}: {}", ingress, e);
                self.metrics.record_rx_error(ingress);
                return;
            }
        };

        let action = {
            let mut table = self.arp_table.write().unwrap();
            let action = process_arp(&packet, &mut table, info.mac_addr, |ip| {
                self.forwarder.is_local(ip)
            });
            self.metrics.arp_table_size.set(table.len());
            action
        };

        match action {
            ArpAction::Reply(reply) => {
                self.metrics.arp_replies_sent.inc();
                debug!("ARP reply for {} to {} on {}", reply.sender_ip, reply.target_ip, ingress);
                out.extend(self.frame(ingress, reply.target_mac, EtherType::Arp, &reply.to_bytes()));
            }
            ArpAction::Learned { ip, mac } => {
                let waiting = self.arp_pending.lock().unwrap().take(ip);
                if let Some((interface, packets)) = waiting {
                    debug!("{} is at {}, sending {} queued", ip, mac, packets.len());
                    self.flush(&interface, mac, packets, out);
                    self.update_pending_gauge();
                }
            }
            ArpAction::None => {}
        }
    }

    fn handle_ipv4(
        &self,
        ingress: &str,
        info: &InterfaceInfo,
        data: &[u8],
        now: Instant,
        out: &mut Outbound,
    ) {
        let action = {
            let routes = self.routes.read().unwrap();
            let arp = self.arp_table.read().unwrap();
            self.forwarder.forward(data, ingress, &routes, &arp)
        };

        match action {
            ForwardAction::Forward {
                interface,
                next_hop_mac,
                packet,
            } => {
                self.metrics.packets_forwarded.inc();
                trace!("forward via {} to {}", interface, next_hop_mac);
                out.extend(self.frame(&interface, next_hop_mac, EtherType::Ipv4, &packet));
            }
            ForwardAction::Resolve {
                interface,
                next_hop,
                packet,
            } => {
                let pending = PendingPacket {
                    packet,
                    origin: PacketOrigin::Forwarded {
                        ingress: ingress.to_string(),
                    },
                };
                self.resolve(&interface, next_hop, pending, now, out);
            }
            ForwardAction::Icmp { kind, trigger } => {
                let source = match kind {
                    IcmpKind::EchoReply => trigger.dst_addr(),
                    _ => info.ip_addr,
                };
                self.send_icmp(kind, &trigger, source, now, out);
            }
            ForwardAction::Drop(reason) => {
                trace!("dropped datagram from {}: {}", ingress, reason);
                self.metrics.packets_dropped.inc();
            }
        }
    }

    /// Queue `pending` behind `next_hop`, asking for it on the first miss.
    fn resolve(
        &self,
        interface: &str,
        next_hop: Ipv4Addr,
        pending: PendingPacket,
        now: Instant,
        out: &mut Outbound,
    ) {
        // A reply may have landed since the forwarding decision. The ARP
        // table stays read-locked until the datagram is queued, so a later
        // reply always finds it.
        let arp = self.arp_table.read().unwrap();
        if let Some(mac) = arp.lookup(next_hop) {
            drop(arp);
            trace!("{} resolved before queuing", next_hop);
            self.flush(interface, mac, vec![pending], out);
            return;
        }
        let outcome = self
            .arp_pending
            .lock()
            .unwrap()
            .enqueue(next_hop, interface, pending, now);
        drop(arp);

        match outcome {
            Enqueued::NewResolution => {
                debug!("resolving {} on {}", next_hop, interface);
                self.send_arp_request(interface, next_hop, out);
                self.update_pending_gauge();
            }
            Enqueued::Queued => {}
            Enqueued::Overflow => {
                trace!("queue for {} full, dropping", next_hop);
                self.metrics.arp_queue_overflows.inc();
                self.metrics.packets_dropped.inc();
            }
        }
    }

    fn send_arp_request(&self, interface: &str, target: Ipv4Addr, out: &mut Outbound) {
        let Some(info) = self.forwarder.interface(interface) else {
            return;
        };
        let request = ArpPacket::request(info.mac_addr, info.ip_addr, target);
        self.metrics.arp_requests_sent.inc();
        out.extend(self.frame(interface, MacAddr::BROADCAST, EtherType::Arp, &request.to_bytes()));
    }

    /// Frame queued datagrams for a neighbor that just resolved.
    fn flush(&self, interface: &str, mac: MacAddr, packets: Vec<PendingPacket>, out: &mut Outbound) {
        for pending in packets {
            if matches!(pending.origin, PacketOrigin::Forwarded { .. }) {
                self.metrics.packets_forwarded.inc();
            }
            out.extend(self.frame(interface, mac, EtherType::Ipv4, &pending.packet));
        }
    }

    fn send_icmp(
        &self,
        kind: IcmpKind,
        trigger: &Ipv4Packet,
        source: Ipv4Addr,
        now: Instant,
        out: &mut Outbound,
    ) {
        let Some(datagram) = icmp_generator::generate(kind, trigger, source) else {
            trace!("no {:?} for datagram from {}", kind, trigger.src_addr());
            self.metrics.packets_dropped.inc();
            return;
        };

        match kind {
            IcmpKind::TimeExceeded => self.metrics.icmp_time_exceeded.inc(),
            IcmpKind::EchoReply => self.metrics.icmp_echo_replies.inc(),
            IcmpKind::NetUnreachable | IcmpKind::HostUnreachable | IcmpKind::PortUnreachable => {
                self.metrics.icmp_dest_unreachable.inc()
            }
        }
        debug!("{:?} to {}", kind, trigger.src_addr());
        self.send_originated(datagram, now, out);
    }

    /// Route a datagram the router built itself.
    fn send_originated(&self, datagram: Vec<u8>, now: Instant, out: &mut Outbound) {
        let Ok(header) = Ipv4Header::parse(&datagram) else {
            return;
        };
        let dst = header.dst_addr();

        let hop = {
            let routes = self.routes.read().unwrap();
            let arp = self.arp_table.read().unwrap();
            routes.lookup(dst).map(|route| {
                let next_hop = route.next_hop.unwrap_or(dst);
                (route.interface.clone(), next_hop, arp.lookup(next_hop))
            })
        };

        match hop {
            Some((interface, _, Some(mac))) => {
                out.extend(self.frame(&interface, mac, EtherType::Ipv4, &datagram));
            }
            Some((interface, next_hop, None)) => {
                let pending = PendingPacket {
                    packet: datagram,
                    origin: PacketOrigin::Local,
                };
                self.resolve(&interface, next_hop, pending, now, out);
            }
            None => {
                trace!("no route back to {}", dst);
                self.metrics.packets_dropped.inc();
            }
        }
    }

    /// Run the ARP retry scheduler.
    pub fn poll_arp(&self, now: Instant) -> Outbound {
        let mut out = Vec::new();
        let events = {
            let arp = self.arp_table.read().unwrap();
            let mut pending = self.arp_pending.lock().unwrap();
            pending.poll(now, |ip| arp.lookup(ip))
        };
        if events.is_empty() {
            return out;
        }

        for event in events {
            match event {
                ResolutionEvent::Retry {
                    next_hop,
                    interface,
                } => {
                    trace!("ARP retry for {} on {}", next_hop, interface);
                    self.send_arp_request(&interface, next_hop, &mut out);
                }
                ResolutionEvent::Resolved {
                    next_hop,
                    interface,
                    mac,
                    packets,
                } => {
                    debug!("{} resolved to {} while pending", next_hop, mac);
                    self.flush(&interface, mac, packets, &mut out);
                }
                ResolutionEvent::Failed {
                    next_hop,
                    interface,
                    packets,
                } => {
                    debug!(
                        "no ARP reply from {} on {}, discarding {} datagram(s)",
                        next_hop,
                        interface,
                        packets.len()
                    );
                    self.metrics.arp_resolution_failures.inc();
                    for pending in packets {
                        self.host_unreachable(pending, now, &mut out);
                    }
                }
            }
        }
        self.update_pending_gauge();
        out
    }

    fn host_unreachable(&self, pending: PendingPacket, now: Instant, out: &mut Outbound) {
        let PacketOrigin::Forwarded { ingress } = pending.origin else {
            self.metrics.packets_dropped.inc();
            return;
        };
        let (Some(info), Ok(trigger)) = (
            self.forwarder.interface(&ingress),
            Ipv4Packet::from_bytes(&pending.packet),
        ) else {
            self.metrics.packets_dropped.inc();
            return;
        };
        self.send_icmp(IcmpKind::HostUnreachable, &trigger, info.ip_addr, now, out);
    }

    fn is_rip_message(&self, info: &InterfaceInfo, data: &[u8]) -> bool {
        if self.rip.is_none() {
            return false;
        }
        let Ok(ip) = Ipv4Header::parse(data) else {
            return false;
        };
        if ip.protocol() != Protocol::Udp as u8 {
            return false;
        }
        let dst = ip.dst_addr();
        let for_us = dst == RIP_MULTICAST
            || dst.is_broadcast()
            || dst == info.broadcast_addr()
            || self.forwarder.is_local(dst);
        for_us && UdpHeader::parse(ip.payload()).is_ok_and(|udp| udp.dst_port() == RIP_PORT)
    }

    fn handle_rip(
        &self,
        ingress: &str,
        info: &InterfaceInfo,
        src_mac: MacAddr,
        data: &[u8],
        now: Instant,
        out: &mut Outbound,
    ) {
        let Some(rip) = &self.rip else {
            return;
        };
        let Ok(ip) = Ipv4Header::parse(data) else {
            return;
        };
        let Ok(udp) = UdpHeader::parse(ip.payload()) else {
            return;
        };
        if !ip.verify_checksum() || !udp.verify_checksum(ip.src_addr(), ip.dst_addr()) {
            trace!("RIP message with bad checksum on {}", ingress);
            self.metrics.packets_dropped.inc();
            return;
        }

        let message = match RipPacket::parse(udp.payload()) {
            Ok(m) => m,
            Err(e) => {
                trace!("bad RIP message on {}: {}", ingress, e);
                self.metrics.packets_dropped.inc();
                return;
            }
        };
        self.metrics.rip_messages_received.inc();

        let src = ip.src_addr();
        match message.command {
            RipCommand::Request => {
                let entries = rip.lock().unwrap().answer_request(&message);
                debug!("RIP request from {} on {}", src, ingress);
                for response in RipPacket::responses(entries) {
                    let datagram =
                        self.rip_datagram(info.ip_addr, src, udp.src_port(), DEFAULT_TTL, &response);
                    self.metrics.rip_responses_sent.inc();
                    out.extend(self.frame(ingress, src_mac, EtherType::Ipv4, &datagram));
                }
            }
            RipCommand::Response => {
                if udp.src_port() != RIP_PORT || self.forwarder.is_local(src) {
                    return;
                }
                if network(src, info.mask) != network(info.ip_addr, info.mask) {
                    trace!("RIP response from off-link {} ignored", src);
                    return;
                }
                self.learn_rip_routes(&message.entries, src, ingress, now);
            }
        }
    }

    /// Merge a neighbor's response. The engine stays locked until the
    /// forwarding table is updated, so concurrent responses reach the table
    /// in the order they changed the RIP map.
    fn learn_rip_routes(&self, entries: &[RipEntry], from: Ipv4Addr, ingress: &str, now: Instant) {
        let Some(rip) = &self.rip else {
            return;
        };
        let mut engine = rip.lock().unwrap();
        let changed = engine.process_response(entries, from, ingress, now);
        self.install_rip_routes(changed);
    }

    /// RIP never displaces connected or static routes. Callers hold the
    /// engine lock.
    fn install_rip_routes(&self, changed: Vec<RipRoute>) {
        if changed.is_empty() {
            return;
        }
        let mut routes = self.routes.write().unwrap();
        for rip_route in changed {
            let shadowed = routes
                .get(rip_route.network, rip_route.mask)
                .is_some_and(|r| r.source != RouteSource::Rip);
            if shadowed {
                continue;
            }
            let route = rip_route.to_route();
            debug!(%route, "RIP route installed");
            routes.add(route);
            self.metrics.rip_routes_learned.inc();
        }
        self.metrics.route_count.set(routes.len());
    }

    /// Ask every neighbor for its table. Connected networks are already in
    /// the RIP map from `add_interface`.
    pub fn start_rip(&self) -> Outbound {
        let mut out = Vec::new();
        if self.rip.is_none() {
            return out;
        }

        let request = RipPacket::whole_table_request();
        for (name, info) in self.forwarder.interfaces() {
            let datagram = self.rip_datagram(info.ip_addr, RIP_MULTICAST, RIP_PORT, 1, &request);
            self.metrics.rip_requests_sent.inc();
            out.extend(self.frame(name, MacAddr::BROADCAST, EtherType::Ipv4, &datagram));
        }
        out
    }

    /// Unsolicited response with the whole table out every interface.
    pub fn rip_advertise(&self) -> Outbound {
        let mut out = Vec::new();
        let Some(rip) = &self.rip else {
            return out;
        };
        let entries = rip.lock().unwrap().entries();

        for (name, info) in self.forwarder.interfaces() {
            for response in RipPacket::responses(entries.clone()) {
                let datagram = self.rip_datagram(info.ip_addr, RIP_MULTICAST, RIP_PORT, 1, &response);
                self.metrics.rip_responses_sent.inc();
                out.extend(self.frame(name, MacAddr::BROADCAST, EtherType::Ipv4, &datagram));
            }
        }
        out
    }

    /// Withdraw learned routes that timed out. Returns how many expired.
    pub fn rip_age(&self, now: Instant) -> usize {
        let Some(rip) = &self.rip else {
            return 0;
        };
        let mut engine = rip.lock().unwrap();
        let expired = engine.age_out(now);
        if expired.is_empty() {
            return 0;
        }

        let mut routes = self.routes.write().unwrap();
        for route in &expired {
            let installed = routes
                .get(route.network, route.mask)
                .is_some_and(|r| r.source == RouteSource::Rip);
            if installed {
                routes.remove(route.network, route.mask);
            }
            debug!("RIP route {}/{} via {:?} expired", route.network, route.mask, route.next_hop);
            self.metrics.rip_routes_expired.inc();
        }
        self.metrics.route_count.set(routes.len());
        expired.len()
    }

    fn rip_datagram(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        dst_port: u16,
        ttl: u8,
        message: &RipPacket,
    ) -> Vec<u8> {
        let udp = UdpBuilder::new()
            .src_port(RIP_PORT)
            .dst_port(dst_port)
            .payload(&message.to_bytes())
            .build(src, dst);
        Ipv4Builder::new()
            .identification(self.next_ip_id.fetch_add(1, Ordering::Relaxed))
            .ttl(ttl)
            .protocol(Protocol::Udp)
            .src_addr(src)
            .dst_addr(dst)
            .payload(&udp)
            .build()
    }

    fn frame(
        &self,
        interface: &str,
        dst_mac: MacAddr,
        ethertype: EtherType,
        payload: &[u8],
    ) -> Option<(String, Vec<u8>)> {
        let info = self.forwarder.interface(interface)?;
        let frame = FrameBuilder::new()
            .dst_mac(dst_mac)
            .src_mac(info.mac_addr)
            .ethertype(ethertype)
            .payload(payload)
            .build();
        Some((interface.to_string(), frame))
    }

    fn update_pending_gauge(&self) {
        let len = self.arp_pending.lock().unwrap().len();
        self.metrics.arp_pending_entries.set(len);
    }
}
