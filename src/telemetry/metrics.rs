//! Packet and protocol counters.
//!
//! Everything here is lock-free except the interface map, which is only
//! written when an interface is registered.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Point-in-time value such as a table size.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: usize) {
        self.0.store(val as u64, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-interface traffic statistics.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    pub rx_packets: Counter,
    pub rx_bytes: Counter,
    pub tx_packets: Counter,
    pub tx_bytes: Counter,
    /// Frames that could not be parsed
    pub rx_errors: Counter,
    /// Failed socket writes
    pub tx_errors: Counter,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }
}

/// Router-wide metrics, shared between the router and the I/O tasks.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    interfaces: RwLock<BTreeMap<String, InterfaceStats>>,

    // Forwarding
    pub packets_forwarded: Counter,
    /// Silent drops of any kind
    pub packets_dropped: Counter,

    // ICMP
    pub icmp_time_exceeded: Counter,
    /// Net, host and port unreachable combined
    pub icmp_dest_unreachable: Counter,
    pub icmp_echo_replies: Counter,

    // ARP
    pub arp_requests_sent: Counter,
    pub arp_replies_sent: Counter,
    /// Next hops that never answered
    pub arp_resolution_failures: Counter,
    /// Datagrams refused because a next hop's queue was full
    pub arp_queue_overflows: Counter,

    // RIP
    pub rip_requests_sent: Counter,
    pub rip_responses_sent: Counter,
    pub rip_messages_received: Counter,
    pub rip_routes_learned: Counter,
    pub rip_routes_expired: Counter,

    // Gauges
    pub arp_table_size: Gauge,
    pub route_count: Gauge,
    pub arp_pending_entries: Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_interface(&self, name: &str) {
        let mut interfaces = self.interfaces.write().unwrap();
        interfaces.entry(name.to_string()).or_default();
    }

    fn with_interface(&self, name: &str, f: impl FnOnce(&InterfaceStats)) {
        if let Some(stats) = self.interfaces.read().unwrap().get(name) {
            f(stats);
        }
    }

    pub fn record_rx(&self, interface: &str, bytes: usize) {
        self.with_interface(interface, |s| s.record_rx(bytes));
    }

    pub fn record_tx(&self, interface: &str, bytes: usize) {
        self.with_interface(interface, |s| s.record_tx(bytes));
    }

    pub fn record_rx_error(&self, interface: &str) {
        self.with_interface(interface, |s| s.rx_errors.inc());
    }

    pub fn record_tx_error(&self, interface: &str) {
        self.with_interface(interface, |s| s.tx_errors.inc());
    }

    /// Flat key/value snapshot, interfaces last.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result: Vec<(String, u64)> = [
            ("packets_forwarded", self.packets_forwarded.get()),
            ("packets_dropped", self.packets_dropped.get()),
            ("icmp_time_exceeded", self.icmp_time_exceeded.get()),
            ("icmp_dest_unreachable", self.icmp_dest_unreachable.get()),
            ("icmp_echo_replies", self.icmp_echo_replies.get()),
            ("arp_requests_sent", self.arp_requests_sent.get()),
            ("arp_replies_sent", self.arp_replies_sent.get()),
            ("arp_resolution_failures", self.arp_resolution_failures.get()),
            ("arp_queue_overflows", self.arp_queue_overflows.get()),
            ("rip_requests_sent", self.rip_requests_sent.get()),
            ("rip_responses_sent", self.rip_responses_sent.get()),
            ("rip_messages_received", self.rip_messages_received.get()),
            ("rip_routes_learned", self.rip_routes_learned.get()),
            ("rip_routes_expired", self.rip_routes_expired.get()),
            ("arp_table_size", self.arp_table_size.get()),
            ("route_count", self.route_count.get()),
            ("arp_pending_entries", self.arp_pending_entries.get()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let interfaces = self.interfaces.read().unwrap();
        for (name, stats) in interfaces.iter() {
            result.extend([
                (format!("{name}_rx_packets"), stats.rx_packets.get()),
                (format!("{name}_rx_bytes"), stats.rx_bytes.get()),
                (format!("{name}_tx_packets"), stats.tx_packets.get()),
                (format!("{name}_tx_bytes"), stats.tx_bytes.get()),
                (format!("{name}_rx_errors"), stats.rx_errors.get()),
                (format!("{name}_tx_errors"), stats.tx_errors.get()),
            ]);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new();
        counter.inc();
        counter.add(10);
        assert_eq!(counter.get(), 11);

        let gauge = Gauge::default();
        gauge.set(7);
        gauge.set(3);
        assert_eq!(gauge.get(), 3);
    }

    #[test]
    fn test_unregistered_interface_ignored() {
        let registry = MetricsRegistry::new();
        registry.record_rx("eth9", 100);
        assert!(!registry.export().iter().any(|(k, _)| k.starts_with("eth9")));
    }

    #[test]
    fn test_export() {
        let registry = MetricsRegistry::new();
        registry.register_interface("eth1");
        registry.register_interface("eth2");

        registry.record_rx("eth1", 100);
        registry.record_rx("eth1", 60);
        registry.record_tx("eth2", 42);
        registry.record_tx_error("eth2");
        registry.rip_routes_learned.add(2);
        registry.route_count.set(4);

        let metrics = registry.export();
        assert!(metrics.contains(&("rip_routes_learned".into(), 2)));
        assert!(metrics.contains(&("route_count".into(), 4)));
        assert!(metrics.contains(&("eth1_rx_packets".into(), 2)));
        assert!(metrics.contains(&("eth1_rx_bytes".into(), 160)));
        assert!(metrics.contains(&("eth2_tx_bytes".into(), 42)));
        assert!(metrics.contains(&("eth2_tx_errors".into(), 1)));
    }
}
