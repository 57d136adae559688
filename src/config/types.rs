//! Configuration types

use crate::dataplane::routing::mask_from_prefix;
use crate::dataplane::{ArpResolution, RipTimers, Route, RouteSource, RouterSettings};
use crate::protocol::MacAddr;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Router configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceConfig>,
    #[serde(default)]
    pub routes: Vec<StaticRouteConfig>,
    #[serde(default)]
    pub arp: Vec<StaticArpConfig>,
    #[serde(default)]
    pub rip: RipConfig,
    #[serde(default)]
    pub arp_resolution: ArpResolutionConfig,
}

impl Config {
    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            arp: self.arp_resolution.policy(),
            rip: self.rip.timers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    /// `a.b.c.d/len`
    pub address: String,
    /// Taken from the kernel when absent
    #[serde(default)]
    pub mac: Option<String>,
}

impl InterfaceConfig {
    /// Address and netmask
    pub fn addressing(&self) -> Result<(Ipv4Addr, Ipv4Addr)> {
        let (ip, prefix) = super::parse_cidr(&self.address)?;
        Ok((ip, mask_from_prefix(prefix)))
    }

    pub fn mac_addr(&self) -> Result<Option<MacAddr>> {
        self.mac
            .as_deref()
            .map(|s| s.parse().map_err(|e| Error::Config(format!("{e}"))))
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticRouteConfig {
    /// `a.b.c.d/len`
    pub destination: String,
    /// Next hop address, or "direct" for an on-link network
    pub gateway: String,
    pub interface: String,
}

impl StaticRouteConfig {
    pub fn gateway_addr(&self) -> Result<Option<Ipv4Addr>> {
        if self.gateway == "direct" {
            return Ok(None);
        }
        self.gateway
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid gateway: {}", self.gateway)))
    }

    pub fn to_route(&self) -> Result<Route> {
        let (addr, prefix) = super::parse_cidr(&self.destination)?;
        let mask = mask_from_prefix(prefix);
        Ok(Route {
            destination: crate::dataplane::routing::network(addr, mask),
            mask,
            next_hop: self.gateway_addr()?,
            interface: self.interface.clone(),
            metric: 1,
            source: RouteSource::Static,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticArpConfig {
    pub ip: Ipv4Addr,
    pub mac: String,
}

impl StaticArpConfig {
    pub fn mac_addr(&self) -> Result<MacAddr> {
        self.mac.parse().map_err(|e| Error::Config(format!("{e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RipConfig {
    pub enabled: bool,
    pub update_interval_secs: u64,
    pub route_timeout_secs: u64,
    pub aging_interval_secs: u64,
}

impl Default for RipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_secs: 10,
            route_timeout_secs: 30,
            aging_interval_secs: 1,
        }
    }
}

impl RipConfig {
    pub fn timers(&self) -> Option<RipTimers> {
        self.enabled.then(|| RipTimers {
            update_interval: Duration::from_secs(self.update_interval_secs),
            route_timeout: Duration::from_secs(self.route_timeout_secs),
            aging_interval: Duration::from_secs(self.aging_interval_secs),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ArpResolutionConfig {
    pub retry_interval_ms: u64,
    pub max_requests: u32,
    pub queue_limit: usize,
}

impl Default for ArpResolutionConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1000,
            max_requests: 3,
            queue_limit: 64,
        }
    }
}

impl ArpResolutionConfig {
    pub fn policy(&self) -> ArpResolution {
        ArpResolution {
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_requests: self.max_requests,
            queue_limit: self.queue_limit,
        }
    }
}
