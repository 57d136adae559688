//! Ethernet II framing

use super::{EtherType, MacAddr};
use crate::{Error, Result};

/// Destination + source + EtherType
pub const HEADER_SIZE: usize = 14;
/// Largest untagged frame without FCS
pub const MAX_FRAME_SIZE: usize = 1514;

/// Borrowed view of a received frame
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer[0..6])
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr::from_slice(&self.buffer[6..12])
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buffer[12], self.buffer[13]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

/// Assembles an outgoing frame. Fields must be supplied in wire order.
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_SIZE),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.buffer.extend_from_slice(&mac.0);
        self
    }

    pub fn ethertype(mut self, ethertype: EtherType) -> Self {
        self.buffer
            .extend_from_slice(&(ethertype as u16).to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DST: MacAddr = MacAddr([0x02, 0, 0, 0, 0x02, 0x01]);
    const SRC: MacAddr = MacAddr([0x02, 0, 0, 0, 0x01, 0x01]);

    #[test]
    fn test_build_then_parse() {
        let bytes = FrameBuilder::new()
            .dst_mac(DST)
            .src_mac(SRC)
            .ethertype(EtherType::Arp)
            .payload(&[1, 2, 3])
            .build();

        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        assert_eq!(&bytes[12..14], &[0x08, 0x06]);

        let frame = Frame::parse(&bytes).unwrap();
        assert_eq!(frame.dst_mac(), DST);
        assert_eq!(frame.src_mac(), SRC);
        assert_eq!(frame.ethertype(), EtherType::Arp as u16);
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_header_only_frame_has_empty_payload() {
        let bytes = [0u8; HEADER_SIZE];
        let frame = Frame::parse(&bytes).unwrap();
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(Frame::parse(&[0u8; 13]).is_err());
    }
}
