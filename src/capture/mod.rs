//! Packet capture backends
//!
//! One raw socket per router interface. The receive and transmit tasks of
//! an interface share the socket, so both operations take `&self`.

mod af_packet;

pub use af_packet::{interface_mac, AfPacketSocket};

use crate::Result;
use std::future::Future;

/// Frame-level I/O on one interface
pub trait Capture: Send + Sync {
    /// Receive one frame into `buf`, returning its length
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Transmit one complete frame
    fn send(&self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}
