//! Configuration management
//!
//! The router is described by one TOML file. Loading only checks syntax;
//! [`validate`] reports semantic problems.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::path::Path;

pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

/// `10.0.1.1/24` -> (10.0.1.1, 24)
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("invalid CIDR: {cidr}")))?;
    let ip: Ipv4Addr = addr
        .parse()
        .map_err(|_| Error::Config(format!("invalid IP: {addr}")))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|len| *len <= 32)
        .ok_or_else(|| Error::Config(format!("invalid prefix: {prefix}")))?;
    Ok((ip, prefix))
}
