//! UDP (RFC 768)

use super::ipv4::{fold, sum_words, Protocol};
use crate::{Error, Result};
use std::net::Ipv4Addr;

pub const HEADER_SIZE: usize = 8;

/// Borrowed UDP datagram, bounded by its length field
#[derive(Debug)]
pub struct UdpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> UdpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("UDP datagram too short".into()));
        }
        let length = u16::from_be_bytes([buffer[4], buffer[5]]) as usize;
        if length < HEADER_SIZE || length > buffer.len() {
            return Err(Error::Parse(format!("bad UDP length {length}")));
        }
        Ok(Self {
            buffer: &buffer[..length],
        })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }

    /// A zero checksum means the sender did not compute one.
    pub fn verify_checksum(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        self.checksum() == 0 || !fold(pseudo_sum(src_ip, dst_ip, self.buffer)) == 0
    }
}

fn pseudo_sum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, datagram: &[u8]) -> u32 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src_ip.octets());
    pseudo[4..8].copy_from_slice(&dst_ip.octets());
    pseudo[9] = Protocol::Udp as u8;
    pseudo[10..12].copy_from_slice(&(datagram.len() as u16).to_be_bytes());
    sum_words(datagram, sum_words(&pseudo, 0))
}

/// Checksum over the pseudo-header and datagram (checksum field zeroed)
pub fn udp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, datagram: &[u8]) -> u16 {
    !fold(pseudo_sum(src_ip, dst_ip, datagram))
}

#[derive(Debug, Clone, Default)]
pub struct UdpBuilder {
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
}

impl UdpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// The addresses feed the pseudo-header checksum.
    pub fn build(self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let length = HEADER_SIZE + self.payload.len();
        let mut buffer = Vec::with_capacity(length);
        buffer.extend_from_slice(&self.src_port.to_be_bytes());
        buffer.extend_from_slice(&self.dst_port.to_be_bytes());
        buffer.extend_from_slice(&(length as u16).to_be_bytes());
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.payload);

        // 0 on the wire means "no checksum"
        let sum = match udp_checksum(src_ip, dst_ip, &buffer) {
            0 => 0xFFFF,
            sum => sum,
        };
        buffer[6..8].copy_from_slice(&sum.to_be_bytes());
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);

    #[test]
    fn test_build_and_verify() {
        let datagram = UdpBuilder::new()
            .src_port(520)
            .dst_port(520)
            .payload(&[2, 2, 0, 0, 1])
            .build(SRC, DST);

        let udp = UdpHeader::parse(&datagram).unwrap();
        assert_eq!(udp.src_port(), 520);
        assert_eq!(udp.dst_port(), 520);
        assert_eq!(udp.payload(), &[2, 2, 0, 0, 1]);
        assert!(udp.verify_checksum(SRC, DST));
        assert!(!udp.verify_checksum(SRC, Ipv4Addr::new(10, 0, 1, 2)));
    }

    #[test]
    fn test_zero_checksum_accepted() {
        let mut datagram = UdpBuilder::new().dst_port(520).build(SRC, DST);
        datagram[6] = 0;
        datagram[7] = 0;
        assert!(UdpHeader::parse(&datagram)
            .unwrap()
            .verify_checksum(SRC, DST));
    }

    #[test]
    fn test_length_field_bounds_payload() {
        let mut datagram = UdpBuilder::new().payload(&[9; 4]).build(SRC, DST);
        datagram.extend_from_slice(&[0; 6]);
        assert_eq!(UdpHeader::parse(&datagram).unwrap().payload(), &[9; 4]);

        datagram[4..6].copy_from_slice(&100u16.to_be_bytes());
        assert!(UdpHeader::parse(&datagram).is_err());
        assert!(UdpHeader::parse(&datagram[..7]).is_err());
    }
}
