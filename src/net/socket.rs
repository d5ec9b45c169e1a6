//! `AF_PACKET` raw socket bound to one interface and one Ethertype.
//!
//! Needs root or `CAP_NET_RAW`. The descriptor is closed on drop, so a
//! socket opened for one probe never outlives it.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use super::{FrameSocket, InterfaceBinding, SocketOpener, TransportError};
use crate::mac::MacAddr;

/// `sll_pkttype` of frames this host transmitted.
const PACKET_OUTGOING: u8 = 4;

pub struct PacketSocket {
    fd: RawFd,
    mac: MacAddr,
}

impl PacketSocket {
    pub fn open(binding: &InterfaceBinding) -> Result<Self, TransportError> {
        let protocol = binding.ethertype.to_be();
        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, protocol as libc::c_int) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EPERM) | Some(libc::EACCES) => TransportError::PermissionDenied,
                _ => TransportError::Io(err),
            });
        }
        // From here on Drop owns the descriptor.
        let mut sock = Self {
            fd,
            mac: MacAddr([0; 6]),
        };

        let not_found = || TransportError::NoInterfaceFound {
            requested: binding.interface.clone(),
            available: Vec::new(),
        };
        let name = CString::new(binding.interface.as_str()).map_err(|_| not_found())?;
        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            return Err(not_found());
        }

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = ifindex as libc::c_int;
        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }

        let mut local: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                fd,
                &mut local as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&local.sll_addr[..6]);
        sock.mac = MacAddr(mac);

        Ok(sock)
    }

    fn set_recv_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        // A zero timeval would mean "block forever".
        let timeout = timeout.max(Duration::from_micros(1));
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let ret = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for PacketSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl AsRawFd for PacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FrameSocket for PacketSocket {
    fn local_mac(&self) -> MacAddr {
        self.mac
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let sent = unsafe {
            libc::send(
                self.fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
                0,
            )
        };
        if sent < 0 {
            return Err(TransportError::Send(io::Error::last_os_error()));
        }
        if sent as usize != bytes.len() {
            return Err(TransportError::Send(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", sent, bytes.len()),
            )));
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(timeout));
            }
            self.set_recv_timeout(remaining)?;

            let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
            let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            let received = unsafe {
                libc::recvfrom(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut from_len,
                )
            };
            if received < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
                        return Err(TransportError::Timeout(timeout));
                    }
                    _ => return Err(TransportError::Receive(err)),
                }
            }
            // Other sockets on this host see our own transmissions too.
            if from.sll_pkttype == PACKET_OUTGOING {
                continue;
            }
            return Ok(received as usize);
        }
    }
}

/// Opens real [`PacketSocket`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketSocketOpener;

impl SocketOpener for PacketSocketOpener {
    fn open(&self, binding: &InterfaceBinding) -> Result<Box<dyn FrameSocket>, TransportError> {
        Ok(Box::new(PacketSocket::open(binding)?))
    }
}
