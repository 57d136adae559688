//! Configuration validation

use super::{parse_cidr, Config};
use crate::dataplane::routing::{mask_from_prefix, network};
use crate::protocol::MacAddr;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

/// Subnet of each interface whose address parsed
struct Subnet<'a> {
    name: &'a str,
    addr: Ipv4Addr,
    mask: Ipv4Addr,
}

impl Subnet<'_> {
    fn contains(&self, ip: Ipv4Addr) -> bool {
        network(ip, self.mask) == network(self.addr, self.mask)
    }

    fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !u32::from(self.mask))
    }
}

pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if !config.logging.has_valid_level() {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            config.logging.level
        ));
    }

    let subnets = validate_interfaces(config, &mut result);
    validate_routes(config, &subnets, &mut result);
    validate_arp(config, &subnets, &mut result);
    validate_rip(config, &mut result);
    validate_arp_resolution(config, &mut result);

    result
}

fn validate_interfaces<'a>(config: &'a Config, result: &mut ValidationResult) -> Vec<Subnet<'a>> {
    if config.interfaces.is_empty() {
        result.error("interfaces: no interfaces defined");
    }

    let mut subnets: Vec<Subnet<'a>> = Vec::new();
    for (name, iface) in &config.interfaces {
        match iface.mac_addr() {
            Ok(Some(mac)) if mac.is_multicast() || mac == MacAddr::ZERO => {
                result.error(format!("interfaces.{name}: mac {mac} is not a unicast address"));
            }
            Ok(Some(_)) => {}
            Ok(None) => result.warn(format!(
                "interfaces.{name}: mac not specified, reading /sys/class/net/{name}/address"
            )),
            Err(e) => result.error(format!("interfaces.{name}: {e}")),
        }

        let (addr, prefix) = match parse_cidr(&iface.address) {
            Ok(parsed) => parsed,
            Err(e) => {
                result.error(format!("interfaces.{name}.address: {e}"));
                continue;
            }
        };
        if prefix == 0 || prefix > 30 {
            result.error(format!(
                "interfaces.{name}.address: /{prefix} leaves no room for neighbours"
            ));
            continue;
        }
        let mask = mask_from_prefix(prefix);
        let subnet = Subnet { name, addr, mask };
        if addr == network(addr, mask) || addr == subnet.broadcast() {
            result.error(format!(
                "interfaces.{name}.address: {addr} is not a host address in /{prefix}"
            ));
        }

        for other in &subnets {
            if other.contains(addr) || network(other.addr, mask) == network(addr, mask) {
                result.error(format!(
                    "interfaces.{name}: subnet overlaps interfaces.{}",
                    other.name
                ));
            }
        }
        subnets.push(subnet);
    }
    subnets
}

fn validate_routes(config: &Config, subnets: &[Subnet], result: &mut ValidationResult) {
    for (i, route) in config.routes.iter().enumerate() {
        let at = format!("routes[{i}]");

        if !config.interfaces.contains_key(&route.interface) {
            result.error(format!(
                "{at}: interface '{}' not defined",
                route.interface
            ));
        }

        match parse_cidr(&route.destination) {
            Ok((addr, prefix)) => {
                if addr != network(addr, mask_from_prefix(prefix)) {
                    result.warn(format!(
                        "{at}: destination {} has host bits set, using {}/{prefix}",
                        route.destination,
                        network(addr, mask_from_prefix(prefix))
                    ));
                }
            }
            Err(e) => result.error(format!("{at}.destination: {e}")),
        }

        match route.gateway_addr() {
            Ok(Some(gw)) => {
                let on_link = subnets
                    .iter()
                    .any(|s| s.name == route.interface && s.contains(gw));
                if !on_link {
                    result.error(format!(
                        "{at}: gateway {gw} is not on the subnet of {}",
                        route.interface
                    ));
                }
            }
            Ok(None) => {}
            Err(e) => result.error(format!("{at}.gateway: {e}")),
        }
    }
}

fn validate_arp(config: &Config, subnets: &[Subnet], result: &mut ValidationResult) {
    for (i, entry) in config.arp.iter().enumerate() {
        if let Err(e) = entry.mac_addr() {
            result.error(format!("arp[{i}].mac: {e}"));
        }
        if !subnets.iter().any(|s| s.contains(entry.ip)) {
            result.warn(format!(
                "arp[{i}]: {} is not on any interface subnet",
                entry.ip
            ));
        }
    }
}

fn validate_rip(config: &Config, result: &mut ValidationResult) {
    let rip = &config.rip;
    if !rip.enabled {
        return;
    }
    for (field, value) in [
        ("update_interval_secs", rip.update_interval_secs),
        ("route_timeout_secs", rip.route_timeout_secs),
        ("aging_interval_secs", rip.aging_interval_secs),
    ] {
        if value == 0 {
            result.error(format!("rip.{field}: must be greater than zero"));
        }
    }
    if rip.route_timeout_secs <= rip.update_interval_secs {
        result.warn(format!(
            "rip.route_timeout_secs ({}) does not exceed update_interval_secs ({}); learned routes will flap",
            rip.route_timeout_secs, rip.update_interval_secs
        ));
    }
}

fn validate_arp_resolution(config: &Config, result: &mut ValidationResult) {
    let arp = &config.arp_resolution;
    if arp.retry_interval_ms == 0 {
        result.error("arp_resolution.retry_interval_ms: must be greater than zero");
    }
    if arp.max_requests == 0 {
        result.error("arp_resolution.max_requests: must be at least 1");
    }
    if arp.queue_limit == 0 {
        result.error("arp_resolution.queue_limit: must be at least 1");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse;

    fn config(extra: &str) -> Config {
        let base = r#"
[interfaces.eth1]
address = "10.0.1.1/24"
mac = "02:00:00:00:01:01"

[interfaces.eth2]
address = "10.0.2.1/24"
mac = "02:00:00:00:02:01"
"#;
        parse(&format!("{base}\n{extra}")).unwrap()
    }

    #[test]
    fn test_valid_config() {
        let result = validate(&config(
            "[[routes]]\ndestination = \"10.0.9.0/24\"\ngateway = \"10.0.1.254\"\ninterface = \"eth1\"\n",
        ));
        assert!(!result.has_errors(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_no_interfaces() {
        let result = validate(&parse("").unwrap());
        assert!(result.has_errors());
    }

    #[test]
    fn test_missing_mac_is_warning() {
        let cfg = parse("[interfaces.eth1]\naddress = \"10.0.1.1/24\"\n").unwrap();
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_overlapping_subnets() {
        let cfg = parse(
            "[interfaces.eth1]\naddress = \"10.0.1.1/24\"\nmac = \"02:00:00:00:01:01\"\n\
             [interfaces.eth2]\naddress = \"10.0.1.2/16\"\nmac = \"02:00:00:00:02:01\"\n",
        )
        .unwrap();
        assert!(validate(&cfg).errors.iter().any(|e| e.contains("overlaps")));
    }

    #[test]
    fn test_network_address_on_interface() {
        let cfg = parse("[interfaces.eth1]\naddress = \"10.0.1.0/24\"\nmac = \"02:00:00:00:01:01\"\n")
            .unwrap();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn test_route_errors() {
        let result = validate(&config(
            "[[routes]]\ndestination = \"10.0.9.0/24\"\ngateway = \"10.0.3.1\"\ninterface = \"eth1\"\n\
             [[routes]]\ndestination = \"10.0.8.0/24\"\ngateway = \"direct\"\ninterface = \"eth9\"\n",
        ));
        assert_eq!(result.errors.len(), 2, "{:?}", result.errors);
    }

    #[test]
    fn test_timer_checks() {
        let result = validate(&config(
            "[rip]\nupdate_interval_secs = 30\nroute_timeout_secs = 30\n\
             [arp_resolution]\nmax_requests = 0\n",
        ));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_disabled_rip_not_checked() {
        let result = validate(&config("[rip]\nenabled = false\nupdate_interval_secs = 0\n"));
        assert!(!result.has_errors());
    }

    #[test]
    fn test_bad_static_arp() {
        let result = validate(&config("[[arp]]\nip = \"192.168.7.1\"\nmac = \"zz\"\n"));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }
}
