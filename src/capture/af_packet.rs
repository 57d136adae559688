//! Linux AF_PACKET capture

use super::Capture;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::ffi::CString;
use std::io;
use std::mem::{size_of, zeroed};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_len(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Raw Ethernet socket bound to one interface.
///
/// The interface runs promiscuous while the socket is open so RIP updates
/// sent to the 224.0.0.9 group MAC are delivered.
pub struct AfPacketSocket {
    fd: AsyncFd<OwnedFd>,
    ifindex: i32,
}

impl AfPacketSocket {
    pub fn bind(ifname: &str) -> Result<Self> {
        let protocol = (libc::ETH_P_ALL as u16).to_be();
        let raw = cvt(unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                protocol as libc::c_int,
            )
        })?;
        // closed on every early return below
        let owned = unsafe { OwnedFd::from_raw_fd(raw) };

        let ifindex = ifindex(owned.as_raw_fd(), ifname)?;

        let mut addr: libc::sockaddr_ll = unsafe { zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = ifindex;
        cvt(unsafe {
            libc::bind(
                owned.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        })?;

        let mut mreq: libc::packet_mreq = unsafe { zeroed() };
        mreq.mr_ifindex = ifindex;
        mreq.mr_type = libc::PACKET_MR_PROMISC as u16;
        cvt(unsafe {
            libc::setsockopt(
                owned.as_raw_fd(),
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                &mreq as *const libc::packet_mreq as *const libc::c_void,
                size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        })?;

        Ok(Self {
            fd: AsyncFd::new(owned)?,
            ifindex,
        })
    }

    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }

    /// Next inbound frame. Our own transmissions, which AF_PACKET loops
    /// back to every socket on the interface, are skipped.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let (len, pkttype) = self
                .fd
                .async_io(Interest::READABLE, |fd| {
                    let mut from: libc::sockaddr_ll = unsafe { zeroed() };
                    let mut from_len = size_of::<libc::sockaddr_ll>() as libc::socklen_t;
                    let len = cvt_len(unsafe {
                        libc::recvfrom(
                            fd.as_raw_fd(),
                            buf.as_mut_ptr() as *mut libc::c_void,
                            buf.len(),
                            0,
                            &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                            &mut from_len,
                        )
                    })?;
                    Ok((len, from.sll_pkttype))
                })
                .await?;

            if pkttype != libc::PACKET_OUTGOING as u8 {
                return Ok(len);
            }
        }
    }

    pub async fn send(&self, frame: &[u8]) -> Result<usize> {
        let sent = self
            .fd
            .async_io(Interest::WRITABLE, |fd| {
                cvt_len(unsafe {
                    libc::send(
                        fd.as_raw_fd(),
                        frame.as_ptr() as *const libc::c_void,
                        frame.len(),
                        0,
                    )
                })
            })
            .await?;
        Ok(sent)
    }
}

impl AsRawFd for AfPacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

impl Capture for AfPacketSocket {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        AfPacketSocket::recv(self, buf).await
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        AfPacketSocket::send(self, buf).await
    }
}

fn ifindex(fd: RawFd, ifname: &str) -> Result<i32> {
    let not_found = || Error::InterfaceNotFound {
        name: ifname.to_string(),
    };
    let name = CString::new(ifname).map_err(|_| not_found())?;

    let mut ifr: libc::ifreq = unsafe { zeroed() };
    let bytes = name.as_bytes_with_nul();
    if bytes.len() > ifr.ifr_name.len() {
        return Err(not_found());
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    cvt(unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) }).map_err(|_| not_found())?;
    Ok(unsafe { ifr.ifr_ifru.ifru_ifindex })
}

/// Hardware address of a kernel interface, read from sysfs.
pub fn interface_mac(ifname: &str) -> Result<MacAddr> {
    let path = format!("/sys/class/net/{ifname}/address");
    let text = std::fs::read_to_string(&path).map_err(|_| Error::InterfaceNotFound {
        name: ifname.to_string(),
    })?;
    text.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{path}: {e}")))
}
