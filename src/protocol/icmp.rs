//! ICMP (RFC 792)

use super::ipv4::checksum;
use crate::{Error, Result};

/// Type, code, checksum and the 4-byte rest-of-header
pub const ICMP_HEADER_SIZE: usize = 8;
/// Bytes of the offending datagram's payload quoted in an error
pub const ORIGINAL_PAYLOAD_QUOTE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    SourceQuench = 4,
    Redirect = 5,
    EchoRequest = 8,
    TimeExceeded = 11,
    ParameterProblem = 12,
}

impl IcmpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IcmpType::EchoReply),
            3 => Some(IcmpType::DestinationUnreachable),
            4 => Some(IcmpType::SourceQuench),
            5 => Some(IcmpType::Redirect),
            8 => Some(IcmpType::EchoRequest),
            11 => Some(IcmpType::TimeExceeded),
            12 => Some(IcmpType::ParameterProblem),
            _ => None,
        }
    }

    /// Error messages must never trigger further ICMP errors.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            IcmpType::DestinationUnreachable
                | IcmpType::SourceQuench
                | IcmpType::Redirect
                | IcmpType::TimeExceeded
                | IcmpType::ParameterProblem
        )
    }
}

/// Destination Unreachable codes
pub mod dest_unreachable {
    pub const NET_UNREACHABLE: u8 = 0;
    pub const HOST_UNREACHABLE: u8 = 1;
    pub const PORT_UNREACHABLE: u8 = 3;
}

/// Time Exceeded codes
pub mod time_exceeded {
    pub const TTL_EXCEEDED: u8 = 0;
}

#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::Parse("ICMP packet too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    pub fn message_type(&self) -> Option<IcmpType> {
        IcmpType::from_u8(self.icmp_type())
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == IcmpType::EchoRequest as u8
    }

    /// Echo identifier
    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// Echo sequence number
    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[ICMP_HEADER_SIZE..]
    }

    pub fn verify_checksum(&self) -> bool {
        checksum(self.buffer) == 0
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buffer
    }
}

fn finish(mut message: Vec<u8>) -> Vec<u8> {
    message[2] = 0;
    message[3] = 0;
    let sum = checksum(&message);
    message[2..4].copy_from_slice(&sum.to_be_bytes());
    message
}

/// Turn an Echo Request into the matching Echo Reply. Identifier, sequence
/// and data are carried over untouched.
pub fn build_echo_reply(request: &[u8]) -> Result<Vec<u8>> {
    let request = IcmpPacket::parse(request)?;
    if !request.is_echo_request() {
        return Err(Error::Parse(format!(
            "ICMP type {} is not an echo request",
            request.icmp_type()
        )));
    }

    let mut reply = request.as_bytes().to_vec();
    reply[0] = IcmpType::EchoReply as u8;
    reply[1] = 0;
    Ok(finish(reply))
}

/// Build an error message quoting the offending datagram: four zero bytes,
/// its IP header, then up to eight bytes of its payload.
pub fn build_error(
    icmp_type: IcmpType,
    code: u8,
    original_header: &[u8],
    original_payload: &[u8],
) -> Vec<u8> {
    let quoted = original_payload.len().min(ORIGINAL_PAYLOAD_QUOTE);
    let mut message = Vec::with_capacity(ICMP_HEADER_SIZE + original_header.len() + quoted);

    message.push(icmp_type as u8);
    message.push(code);
    message.extend_from_slice(&[0u8; 6]);
    message.extend_from_slice(original_header);
    message.extend_from_slice(&original_payload[..quoted]);

    finish(message)
}
