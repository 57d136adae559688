//! IPv4 (RFC 791)

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Header size without options
pub const MIN_HEADER_SIZE: usize = 20;
/// TTL for datagrams the router originates
pub const DEFAULT_TTL: u8 = 64;

const TTL_OFFSET: usize = 8;
const CHECKSUM_OFFSET: usize = 10;

/// Upper-layer protocols the router looks inside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Protocol::Icmp),
            6 => Some(Protocol::Tcp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Validates version, IHL and total length, returning
/// `(header_len, total_len)`.
fn parse_lengths(buffer: &[u8]) -> Result<(usize, usize)> {
    if buffer.len() < MIN_HEADER_SIZE {
        return Err(Error::Parse("IPv4 header too short".into()));
    }
    if buffer[0] >> 4 != 4 {
        return Err(Error::Parse("not an IPv4 packet".into()));
    }

    let header_len = (buffer[0] & 0x0F) as usize * 4;
    if header_len < MIN_HEADER_SIZE || buffer.len() < header_len {
        return Err(Error::Parse("IPv4 header truncated".into()));
    }

    let total_len = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
    if total_len < header_len || total_len > buffer.len() {
        return Err(Error::Parse(format!(
            "IPv4 total length {} outside {}..={}",
            total_len,
            header_len,
            buffer.len()
        )));
    }

    Ok((header_len, total_len))
}

/// Borrowed IPv4 datagram. Link-layer padding past the total length is
/// excluded.
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        let (header_len, total_len) = parse_lengths(buffer)?;
        Ok(Self {
            buffer: &buffer[..total_len],
            header_len,
        })
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[TTL_OFFSET]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[CHECKSUM_OFFSET], self.buffer[CHECKSUM_OFFSET + 1]])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        read_addr(self.buffer, 12)
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        read_addr(self.buffer, 16)
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Header bytes including options
    pub fn header(&self) -> &'a [u8] {
        &self.buffer[..self.header_len]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.header_len..]
    }

    /// Recomputes the checksum with the field zeroed and compares it to the
    /// received value.
    pub fn verify_checksum(&self) -> bool {
        let mut header = self.header().to_vec();
        header[CHECKSUM_OFFSET] = 0;
        header[CHECKSUM_OFFSET + 1] = 0;
        checksum(&header) == self.checksum()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }
}

fn read_addr(buffer: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    )
}

/// Internet checksum (RFC 1071). Shared by IPv4, ICMP and UDP.
pub fn checksum(data: &[u8]) -> u16 {
    !fold(sum_words(data, 0))
}

pub(crate) fn sum_words(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u16::from_be_bytes([*last, 0]) as u32);
    }
    sum
}

pub(crate) fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Owned datagram that the forwarding path rewrites in place
#[derive(Debug, Clone)]
pub struct Ipv4Packet {
    buffer: Vec<u8>,
    header_len: usize,
}

impl Ipv4Packet {
    /// Copies the datagram, dropping any trailing link-layer padding.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (header_len, total_len) = parse_lengths(data)?;
        Ok(Self {
            buffer: data[..total_len].to_vec(),
            header_len,
        })
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[TTL_OFFSET]
    }

    /// Decrements the TTL, saturating at zero, and returns the new value.
    /// The checksum is left stale; call [`Ipv4Packet::update_checksum`].
    pub fn decrement_ttl(&mut self) -> u8 {
        self.buffer[TTL_OFFSET] = self.buffer[TTL_OFFSET].saturating_sub(1);
        self.buffer[TTL_OFFSET]
    }

    pub fn update_checksum(&mut self) {
        self.buffer[CHECKSUM_OFFSET] = 0;
        self.buffer[CHECKSUM_OFFSET + 1] = 0;
        let sum = checksum(&self.buffer[..self.header_len]);
        self.buffer[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        read_addr(&self.buffer, 12)
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        read_addr(&self.buffer, 16)
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn header(&self) -> &[u8] {
        &self.buffer[..self.header_len]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Builds option-less datagrams for traffic the router originates
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    identification: u16,
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            identification: 0,
            ttl: DEFAULT_TTL,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload: Vec::new(),
        }
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol as u8;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = MIN_HEADER_SIZE + self.payload.len();
        let mut buffer = vec![0u8; total_length];

        buffer[0] = 0x45;
        buffer[2..4].copy_from_slice(&(total_length as u16).to_be_bytes());
        buffer[4..6].copy_from_slice(&self.identification.to_be_bytes());
        buffer[TTL_OFFSET] = self.ttl;
        buffer[9] = self.protocol;
        buffer[12..16].copy_from_slice(&self.src_addr.octets());
        buffer[16..20].copy_from_slice(&self.dst_addr.octets());

        let sum = checksum(&buffer[..MIN_HEADER_SIZE]);
        buffer[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());

        buffer[MIN_HEADER_SIZE..].copy_from_slice(&self.payload);
        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}
