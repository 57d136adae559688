//! The tokio tasks wired to in-memory captures.

use ripster::capture::Capture;
use ripster::dataplane::routing::mask_from_prefix;
use ripster::dataplane::{Router, RouterSettings};
use ripster::protocol::arp::{ArpOp, ArpPacket};
use ripster::protocol::ethernet::{Frame, FrameBuilder, HEADER_SIZE};
use ripster::protocol::ipv4::{Ipv4Builder, Ipv4Header, Protocol};
use ripster::protocol::rip::{RipPacket, RIP_MULTICAST};
use ripster::protocol::udp::{UdpBuilder, UdpHeader};
use ripster::protocol::{EtherType, MacAddr};
use ripster::runtime::{spawn_interface, spawn_timers, Outboxes};
use ripster::telemetry::MetricsRegistry;
use ripster::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::timeout;

const R1_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0x01, 0x01]);
const R2_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0x02, 0x01]);
const H1_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0x01, 0x64]);
const H2_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0x02, 0x05]);
const H1_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 100);
const H2_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 5);
const R2_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 1);

/// Frames pushed into `inbound` are received; sent frames land on `wire`.
struct MemoryCapture {
    inbound: Mutex<UnboundedReceiver<Vec<u8>>>,
    wire: UnboundedSender<Vec<u8>>,
}

impl Capture for MemoryCapture {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        match self.inbound.lock().await.recv().await {
            Some(frame) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            None => Ok(0),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        let _ = self.wire.send(buf.to_vec());
        Ok(buf.len())
    }
}

/// Host side of one link
struct Link {
    inject: UnboundedSender<Vec<u8>>,
    wire: UnboundedReceiver<Vec<u8>>,
}

impl Link {
    async fn next_frame(&mut self) -> Vec<u8> {
        timeout(Duration::from_secs(2), self.wire.recv())
            .await
            .expect("no frame within 2s")
            .expect("transmit side closed")
    }
}

struct Harness {
    router: Arc<Router>,
    outboxes: Arc<Outboxes>,
    links: Vec<Link>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

fn start(settings: RouterSettings) -> Harness {
    let mut router = Router::new(Arc::new(MetricsRegistry::new()), settings);
    router.add_interface("eth1", R1_MAC, Ipv4Addr::new(10, 0, 1, 1), mask_from_prefix(24));
    router.add_interface("eth2", R2_MAC, R2_IP, mask_from_prefix(24));
    router.add_static_arp(H1_IP, H1_MAC);
    let router = Arc::new(router);

    let mut outboxes = Outboxes::new();
    let mut pending = Vec::new();
    let mut links = Vec::new();
    for name in ["eth1", "eth2"] {
        let (inject, inbound) = unbounded_channel();
        let (wire_tx, wire) = unbounded_channel();
        let capture = Arc::new(MemoryCapture {
            inbound: Mutex::new(inbound),
            wire: wire_tx,
        });
        pending.push((name.to_string(), capture, outboxes.channel(name)));
        links.push(Link { inject, wire });
    }

    let outboxes = Arc::new(outboxes);
    let mut tasks = Vec::new();
    for (name, capture, outbox) in pending {
        let (rx, tx) = spawn_interface(
            Arc::clone(&router),
            name,
            capture,
            outbox,
            Arc::clone(&outboxes),
        );
        tasks.push(rx);
        tasks.push(tx);
    }

    Harness {
        router,
        outboxes,
        links,
        tasks,
    }
}

fn no_rip() -> RouterSettings {
    RouterSettings {
        rip: None,
        ..RouterSettings::default()
    }
}

fn datagram_to_h2() -> Vec<u8> {
    let udp = UdpBuilder::new()
        .src_port(4000)
        .dst_port(9)
        .payload(b"data")
        .build(H1_IP, H2_IP);
    let ip = Ipv4Builder::new()
        .protocol(Protocol::Udp)
        .src_addr(H1_IP)
        .dst_addr(H2_IP)
        .payload(&udp)
        .build();
    FrameBuilder::new()
        .dst_mac(R1_MAC)
        .src_mac(H1_MAC)
        .ethertype(EtherType::Ipv4)
        .payload(&ip)
        .build()
}

#[tokio::test]
async fn test_forwarding_through_tasks() {
    let mut h = start(no_rip());

    h.links[0].inject.send(datagram_to_h2()).unwrap();

    let frame = h.links[1].next_frame().await;
    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.ethertype(), EtherType::Arp as u16);
    let request = ArpPacket::parse(eth.payload()).unwrap();
    assert_eq!(request.operation, ArpOp::Request);
    assert_eq!(request.target_ip, H2_IP);

    let reply = ArpPacket {
        operation: ArpOp::Reply,
        sender_mac: H2_MAC,
        sender_ip: H2_IP,
        target_mac: R2_MAC,
        target_ip: R2_IP,
    };
    let reply = FrameBuilder::new()
        .dst_mac(R2_MAC)
        .src_mac(H2_MAC)
        .ethertype(EtherType::Arp)
        .payload(&reply.to_bytes())
        .build();
    h.links[1].inject.send(reply).unwrap();

    let frame = h.links[1].next_frame().await;
    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.dst_mac(), H2_MAC);
    assert_eq!(eth.src_mac(), R2_MAC);
    let ip = Ipv4Header::parse(&frame[HEADER_SIZE..]).unwrap();
    assert_eq!(ip.ttl(), 63);
    assert_eq!(ip.dst_addr(), H2_IP);

    assert_eq!(h.router.metrics().packets_forwarded.get(), 1);
}

#[tokio::test]
async fn test_receive_task_stops_at_end_of_stream() {
    let h = start(no_rip());
    let Harness { links, tasks, .. } = h;
    drop(links);

    let rx_tasks: Vec<_> = tasks.into_iter().step_by(2).collect();
    for task in rx_tasks {
        timeout(Duration::from_secs(2), task)
            .await
            .expect("receive task still running")
            .unwrap();
    }
}

#[tokio::test]
async fn test_timers_start_rip() {
    let mut h = start(RouterSettings::default());
    let timers = spawn_timers(Arc::clone(&h.router), Arc::clone(&h.outboxes));
    assert_eq!(timers.len(), 3);

    for link in &mut h.links {
        let frame = link.next_frame().await;
        assert_eq!(Frame::parse(&frame).unwrap().dst_mac(), MacAddr::BROADCAST);
        let ip = Ipv4Header::parse(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(ip.dst_addr(), RIP_MULTICAST);
        assert_eq!(ip.ttl(), 1);
        let udp = UdpHeader::parse(ip.payload()).unwrap();
        let rip = RipPacket::parse(udp.payload()).unwrap();
        assert!(rip.is_whole_table_request());
    }
    assert_eq!(h.router.metrics().rip_requests_sent.get(), 2);

    for task in timers.into_iter().chain(h.tasks) {
        task.abort();
    }
}

#[tokio::test]
async fn test_timers_without_rip() {
    let h = start(no_rip());
    let timers = spawn_timers(Arc::clone(&h.router), Arc::clone(&h.outboxes));
    assert_eq!(timers.len(), 1);
    for task in timers {
        task.abort();
    }
}

#[tokio::test]
async fn test_dispatch_skips_unknown_interface() {
    let mut h = start(no_rip());
    h.outboxes.dispatch(vec![
        ("eth9".to_string(), vec![0u8; 60]),
        ("eth1".to_string(), vec![1u8; 60]),
    ]);
    assert_eq!(h.links[0].next_frame().await, vec![1u8; 60]);
}
