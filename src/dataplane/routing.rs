//! Forwarding table

use std::fmt;
use std::net::Ipv4Addr;

/// Where a route came from. RIP may only replace its own routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    /// Subnet of a local interface
    Connected,
    /// Configured by the operator
    Static,
    /// Learned from a RIP neighbour
    Rip,
}

impl fmt::Display for RouteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteSource::Connected => "connected",
            RouteSource::Static => "static",
            RouteSource::Rip => "rip",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Network address, already masked
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// None for directly connected networks
    pub next_hop: Option<Ipv4Addr>,
    pub interface: String,
    pub metric: u32,
    pub source: RouteSource,
}

impl Route {
    pub fn connected(address: Ipv4Addr, mask: Ipv4Addr, interface: &str) -> Self {
        Self {
            destination: network(address, mask),
            mask,
            next_hop: None,
            interface: interface.to_string(),
            metric: 1,
            source: RouteSource::Connected,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        prefix_len(self.mask)
    }

    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        network(addr, self.mask) == self.destination
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ", self.destination, self.prefix_len())?;
        match self.next_hop {
            Some(gw) => write!(f, "via {gw} ")?,
            None => f.write_str("direct ")?,
        }
        write!(
            f,
            "dev {} metric {} ({})",
            self.interface, self.metric, self.source
        )
    }
}

pub fn network(addr: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) & u32::from(mask))
}

/// Number of leading one bits in the mask
pub fn prefix_len(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

/// `/24` -> `255.255.255.0`. Lengths above 32 saturate.
pub fn mask_from_prefix(prefix_len: u8) -> Ipv4Addr {
    match prefix_len {
        0 => Ipv4Addr::UNSPECIFIED,
        len => Ipv4Addr::from(!0u32 << (32 - u32::from(len.min(32)))),
    }
}

/// True when the mask is a run of ones followed by zeros.
pub fn is_contiguous_mask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    bits.leading_ones() + bits.trailing_zeros() == 32
}

/// Routes kept ordered by prefix length, longest first, so the first match
/// is the longest-prefix match.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Insert, replacing any route for the same network and mask.
    pub fn add(&mut self, route: Route) {
        self.remove(route.destination, route.mask);
        let position = self
            .routes
            .iter()
            .position(|r| r.prefix_len() < route.prefix_len())
            .unwrap_or(self.routes.len());
        self.routes.insert(position, route);
    }

    pub fn remove(&mut self, destination: Ipv4Addr, mask: Ipv4Addr) -> Option<Route> {
        let index = self
            .routes
            .iter()
            .position(|r| r.destination == destination && r.mask == mask)?;
        Some(self.routes.remove(index))
    }

    pub fn get(&self, destination: Ipv4Addr, mask: Ipv4Addr) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.destination == destination && r.mask == mask)
    }

    /// Longest-prefix match
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(addr))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: [u8; 4], prefix: u8, gw: Option<[u8; 4]>, iface: &str) -> Route {
        Route {
            destination: Ipv4Addr::from(dest),
            mask: mask_from_prefix(prefix),
            next_hop: gw.map(Ipv4Addr::from),
            interface: iface.to_string(),
            metric: 1,
            source: RouteSource::Static,
        }
    }

    #[test]
    fn test_longest_prefix_match() {
        let mut table = RoutingTable::new();
        table.add(route([0, 0, 0, 0], 0, Some([10, 0, 1, 254]), "eth1"));
        table.add(route([10, 0, 0, 0], 8, Some([10, 0, 2, 254]), "eth2"));
        table.add(route([10, 0, 3, 0], 24, None, "eth3"));

        assert_eq!(table.lookup(Ipv4Addr::new(10, 0, 3, 7)).unwrap().interface, "eth3");
        assert_eq!(table.lookup(Ipv4Addr::new(10, 9, 9, 9)).unwrap().interface, "eth2");
        assert_eq!(table.lookup(Ipv4Addr::new(8, 8, 8, 8)).unwrap().interface, "eth1");
    }

    #[test]
    fn test_no_match_without_default() {
        let mut table = RoutingTable::new();
        table.add(route([10, 0, 1, 0], 24, None, "eth1"));
        assert!(table.lookup(Ipv4Addr::new(10, 0, 2, 1)).is_none());
    }

    #[test]
    fn test_add_replaces_same_prefix() {
        let mut table = RoutingTable::new();
        table.add(route([10, 0, 9, 0], 24, Some([10, 0, 1, 2]), "eth1"));
        table.add(route([10, 0, 9, 0], 24, Some([10, 0, 2, 2]), "eth2"));

        assert_eq!(table.len(), 1);
        let found = table.lookup(Ipv4Addr::new(10, 0, 9, 1)).unwrap();
        assert_eq!(found.next_hop, Some(Ipv4Addr::new(10, 0, 2, 2)));
    }

    #[test]
    fn test_remove() {
        let mut table = RoutingTable::new();
        table.add(route([10, 0, 9, 0], 24, None, "eth1"));
        assert!(table
            .remove(Ipv4Addr::new(10, 0, 9, 0), mask_from_prefix(24))
            .is_some());
        assert!(table
            .remove(Ipv4Addr::new(10, 0, 9, 0), mask_from_prefix(24))
            .is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_connected_route_masks_address() {
        let r = Route::connected(Ipv4Addr::new(10, 0, 1, 1), mask_from_prefix(24), "eth1");
        assert_eq!(r.destination, Ipv4Addr::new(10, 0, 1, 0));
        assert_eq!(r.next_hop, None);
        assert_eq!(r.to_string(), "10.0.1.0/24 direct dev eth1 metric 1 (connected)");
    }

    #[test]
    fn test_mask_helpers() {
        assert_eq!(mask_from_prefix(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(mask_from_prefix(0), Ipv4Addr::UNSPECIFIED);
        assert_eq!(mask_from_prefix(32), Ipv4Addr::BROADCAST);
        assert_eq!(prefix_len(Ipv4Addr::new(255, 255, 240, 0)), 20);
        assert!(is_contiguous_mask(Ipv4Addr::new(255, 255, 240, 0)));
        assert!(!is_contiguous_mask(Ipv4Addr::new(255, 0, 255, 0)));
    }
}
