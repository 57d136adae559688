//! RIPv2 route state
//!
//! The engine keeps its own view of every network it knows and decides what
//! changes. Installing those changes in the forwarding table and putting
//! messages on the wire is left to the router.

use crate::dataplane::routing::{is_contiguous_mask, network, Route, RouteSource};
use crate::protocol::rip::{RipEntry, RipPacket, AFI_INET, RIP_INFINITY};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// RIP timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RipTimers {
    /// Period of unsolicited responses
    pub update_interval: Duration,
    /// Age at which a learned route is withdrawn
    pub route_timeout: Duration,
    /// How often routes are checked against `route_timeout`
    pub aging_interval: Duration,
}

impl Default for RipTimers {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(10),
            route_timeout: Duration::from_secs(30),
            aging_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipRoute {
    pub network: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// None for a connected network
    pub next_hop: Option<Ipv4Addr>,
    pub metric: u32,
    pub interface: String,
    /// None for a connected network, which never ages
    pub last_updated: Option<Instant>,
}

impl RipRoute {
    /// Forwarding table entry for a learned route
    pub fn to_route(&self) -> Route {
        Route {
            destination: self.network,
            mask: self.mask,
            next_hop: self.next_hop,
            interface: self.interface.clone(),
            metric: self.metric,
            source: RouteSource::Rip,
        }
    }
}

#[derive(Debug, Default)]
pub struct RipEngine {
    routes: BTreeMap<(Ipv4Addr, Ipv4Addr), RipRoute>,
    timers: RipTimers,
}

impl RipEngine {
    pub fn new(timers: RipTimers) -> Self {
        Self {
            routes: BTreeMap::new(),
            timers,
        }
    }

    pub fn timers(&self) -> &RipTimers {
        &self.timers
    }

    /// Advertise a directly attached network at metric 1.
    pub fn add_connected(&mut self, address: Ipv4Addr, mask: Ipv4Addr, interface: &str) {
        let net = network(address, mask);
        self.routes.insert(
            (net, mask),
            RipRoute {
                network: net,
                mask,
                next_hop: None,
                metric: 1,
                interface: interface.to_string(),
                last_updated: None,
            },
        );
    }

    /// Merge the entries of a response received from `from` on `interface`.
    ///
    /// Returns the routes that were added or replaced. Refreshes are not
    /// reported since the forwarding table does not change.
    pub fn process_response(
        &mut self,
        entries: &[RipEntry],
        from: Ipv4Addr,
        interface: &str,
        now: Instant,
    ) -> Vec<RipRoute> {
        let mut changed = Vec::new();

        for entry in entries {
            if entry.afi != AFI_INET || !(1..=RIP_INFINITY).contains(&entry.metric) {
                continue;
            }
            let net = network(entry.address, entry.mask);
            if net.is_multicast() || net.is_loopback() || !is_contiguous_mask(entry.mask) {
                continue;
            }
            let metric = (entry.metric + 1).min(RIP_INFINITY);

            match self.routes.get_mut(&(net, entry.mask)) {
                Some(route) if metric < route.metric => {
                    route.metric = metric;
                    route.next_hop = Some(from);
                    route.interface = interface.to_string();
                    route.last_updated = Some(now);
                    changed.push(route.clone());
                }
                Some(route) => {
                    if route.next_hop == Some(from) && metric == route.metric {
                        route.last_updated = Some(now);
                    }
                }
                None if metric < RIP_INFINITY => {
                    let route = RipRoute {
                        network: net,
                        mask: entry.mask,
                        next_hop: Some(from),
                        metric,
                        interface: interface.to_string(),
                        last_updated: Some(now),
                    };
                    self.routes.insert((net, entry.mask), route.clone());
                    changed.push(route);
                }
                None => {}
            }
        }
        changed
    }

    /// Withdraw learned routes not refreshed within the route timeout.
    pub fn age_out(&mut self, now: Instant) -> Vec<RipRoute> {
        let timeout = self.timers.route_timeout;
        let expired: Vec<_> = self
            .routes
            .iter()
            .filter(|(_, r)| {
                r.last_updated
                    .is_some_and(|at| now.saturating_duration_since(at) >= timeout)
            })
            .map(|(key, _)| *key)
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.routes.remove(&key))
            .collect()
    }

    /// Every known route as it is advertised
    pub fn entries(&self) -> Vec<RipEntry> {
        self.routes
            .values()
            .map(|r| RipEntry::route(r.network, r.mask, r.metric))
            .collect()
    }

    /// Entries answering a request. A whole-table request gets the full
    /// table; otherwise each asked-for network is echoed back with our
    /// metric, or infinity when unknown.
    pub fn answer_request(&self, request: &RipPacket) -> Vec<RipEntry> {
        if request.is_whole_table_request() {
            return self.entries();
        }
        request
            .entries
            .iter()
            .map(|asked| {
                let net = network(asked.address, asked.mask);
                let metric = self
                    .routes
                    .get(&(net, asked.mask))
                    .map_or(RIP_INFINITY, |r| r.metric);
                RipEntry::route(asked.address, asked.mask, metric)
            })
            .collect()
    }

    pub fn get(&self, network: Ipv4Addr, mask: Ipv4Addr) -> Option<&RipRoute> {
        self.routes.get(&(network, mask))
    }

    pub fn routes(&self) -> impl Iterator<Item = &RipRoute> {
        self.routes.values()
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
    use crate::dataplane::routing::mask_from_prefix;
    use crate::protocol::rip::RipCommand;

    const NEIGHBOR: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 2);
    const OTHER: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 3);

    fn advert(net: [u8; 4], prefix: u8, metric: u32) -> RipEntry {
        RipEntry::route(Ipv4Addr::from(net), mask_from_prefix(prefix), metric)
    }

    fn engine() -> RipEngine {
        let mut rip = RipEngine::new(RipTimers::default());
        rip.add_connected(Ipv4Addr::new(10, 0, 1, 1), mask_from_prefix(24), "eth1");
        rip
    }

    #[test]
    fn test_learns_new_network_one_hop_further() {
        let mut rip = engine();
        let now = Instant::now();
        let changed = rip.process_response(&[advert([10, 0, 3, 0], 24, 1)], NEIGHBOR, "eth1", now);

        assert_eq!(changed.len(), 1);
        let route = rip.get(Ipv4Addr::new(10, 0, 3, 0), mask_from_prefix(24)).unwrap();
        assert_eq!(route.metric, 2);
        assert_eq!(route.next_hop, Some(NEIGHBOR));
        assert_eq!(route.interface, "eth1");
        assert_eq!(route.last_updated, Some(now));
        assert_eq!(route.to_route().source, RouteSource::Rip);
    }

    #[test]
    fn test_unreachable_network_not_added() {
        let mut rip = engine();
        let changed = rip.process_response(
            &[advert([10, 0, 4, 0], 24, 15), advert([10, 0, 5, 0], 24, 16)],
            NEIGHBOR,
            "eth1",
            Instant::now(),
        );
        assert!(changed.is_empty());
        assert_eq!(rip.len(), 1);
    }

    #[test]
    fn test_replacement_requires_strictly_lower_metric() {
        let mut rip = engine();
        let now = Instant::now();
        rip.process_response(&[advert([10, 0, 3, 0], 24, 3)], NEIGHBOR, "eth1", now);

        // equal cost through another neighbor is ignored
        let changed = rip.process_response(&[advert([10, 0, 3, 0], 24, 3)], OTHER, "eth2", now);
        assert!(changed.is_empty());

        let changed = rip.process_response(&[advert([10, 0, 3, 0], 24, 1)], OTHER, "eth2", now);
        assert_eq!(changed.len(), 1);
        let route = rip.get(Ipv4Addr::new(10, 0, 3, 0), mask_from_prefix(24)).unwrap();
        assert_eq!(route.metric, 2);
        assert_eq!(route.next_hop, Some(OTHER));
        assert_eq!(route.interface, "eth2");
    }

    #[test]
    fn test_connected_network_not_replaced() {
        let mut rip = engine();
        let changed =
            rip.process_response(&[advert([10, 0, 1, 0], 24, 1)], NEIGHBOR, "eth1", Instant::now());
        assert!(changed.is_empty());
        assert!(rip
            .get(Ipv4Addr::new(10, 0, 1, 0), mask_from_prefix(24))
            .unwrap()
            .last_updated
            .is_none());
    }

    #[test]
    fn test_ignores_bad_entries() {
        let mut rip = engine();
        let mut wrong_family = advert([10, 0, 6, 0], 24, 1);
        wrong_family.afi = 0;
        let entries = [
            wrong_family,
            advert([10, 0, 7, 0], 24, 0),
            advert([10, 0, 8, 0], 24, 17),
            advert([224, 0, 0, 0], 4, 1),
            RipEntry::route(
                Ipv4Addr::new(10, 9, 0, 0),
                Ipv4Addr::new(255, 0, 255, 0),
                1,
            ),
        ];
        assert!(rip
            .process_response(&entries, NEIGHBOR, "eth1", Instant::now())
            .is_empty());
    }

    #[test]
    fn test_same_neighbor_refreshes_age() {
        let mut rip = engine();
        let t0 = Instant::now();
        rip.process_response(&[advert([10, 0, 3, 0], 24, 1)], NEIGHBOR, "eth1", t0);

        let t1 = t0 + Duration::from_secs(20);
        rip.process_response(&[advert([10, 0, 3, 0], 24, 1)], NEIGHBOR, "eth1", t1);
        assert!(rip.age_out(t0 + Duration::from_secs(35)).is_empty());

        // a different advertiser at the same cost does not keep it alive
        rip.process_response(&[advert([10, 0, 3, 0], 24, 1)], OTHER, "eth1", t1 + Duration::from_secs(5));
        let expired = rip.age_out(t1 + Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].network, Ipv4Addr::new(10, 0, 3, 0));
    }

    #[test]
    fn test_aging_boundary_and_connected_exempt() {
        let mut rip = engine();
        let t0 = Instant::now();
        rip.process_response(&[advert([10, 0, 3, 0], 24, 1)], NEIGHBOR, "eth1", t0);

        assert!(rip.age_out(t0 + Duration::from_millis(29_999)).is_empty());
        assert_eq!(rip.age_out(t0 + Duration::from_secs(30)).len(), 1);
        assert!(rip.age_out(t0 + Duration::from_secs(3600)).is_empty());
        assert_eq!(rip.len(), 1);
    }

    #[test]
    fn test_entries_and_requests() {
        let mut rip = engine();
        rip.process_response(&[advert([10, 0, 3, 0], 24, 1)], NEIGHBOR, "eth1", Instant::now());

        let entries = rip.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, Ipv4Addr::new(10, 0, 1, 0));
        assert_eq!(entries[0].metric, 1);
        assert_eq!(entries[1].metric, 2);

        assert_eq!(rip.answer_request(&RipPacket::whole_table_request()), entries);

        let specific = RipPacket {
            command: RipCommand::Request,
            entries: vec![advert([10, 0, 3, 0], 24, 16), advert([10, 9, 0, 0], 16, 16)],
        };
        let answer = rip.answer_request(&specific);
        assert_eq!(answer[0].metric, 2);
        assert_eq!(answer[1].metric, RIP_INFINITY);
    }
}
