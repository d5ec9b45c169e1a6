//! Raw Ethernet frame transport on the test PC.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::{Frame, FrameError, MAX_FRAME_LEN};
use crate::mac::MacAddr;

pub mod iface;
pub mod socket;

pub use socket::PacketSocketOpener;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network interface not found (requested {requested:?}, available: {available:?})")]
    NoInterfaceFound {
        requested: String,
        available: Vec<String>,
    },
    #[error("insufficient permission to create raw socket")]
    PermissionDenied,
    #[error("no frame received within {0:?}")]
    Timeout(Duration),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(io::Error),
}

impl TransportError {
    /// The test PC itself is unusable; retrying or continuing is pointless.
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            TransportError::NoInterfaceFound { .. } | TransportError::PermissionDenied
        )
    }
}

/// Which NIC and which Ethertype a socket is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBinding {
    pub interface: String,
    pub ethertype: u16,
}

/// One open link-layer socket. Dropping it releases the descriptor.
pub trait FrameSocket: Send {
    fn local_mac(&self) -> MacAddr;
    /// Transmit one complete frame in a single write.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    /// Block for at most `timeout` for the next inbound frame.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

pub trait SocketOpener: Send + Sync {
    fn open(&self, binding: &InterfaceBinding) -> Result<Box<dyn FrameSocket>, TransportError>;
}

impl dyn FrameSocket + '_ {
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.send(&frame.to_bytes())
    }

    pub fn recv_frame(&mut self, timeout: Duration) -> Result<Frame, TransportError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let n = self.recv(&mut buf, timeout)?;
        Ok(Frame::parse(&buf[..n])?)
    }
}

/// Frame I/O against one resolved interface.
///
/// Every operation acquires its own socket and releases it before
/// returning, on every path.
#[derive(Clone)]
pub struct FrameTransport {
    binding: InterfaceBinding,
    opener: Arc<dyn SocketOpener>,
}

impl FrameTransport {
    /// Resolve `interface` (empty = auto-detect) and check that a raw socket
    /// can actually be created on it.
    pub fn open(interface: &str, ethertype: u16) -> Result<Self, TransportError> {
        let available = iface::list_interfaces();
        let name = iface::resolve_interface(&available, interface)?;
        debug!(?available, selected = %name, "resolved test interface");
        let transport = Self::with_opener(
            InterfaceBinding {
                interface: name,
                ethertype,
            },
            Arc::new(PacketSocketOpener),
        );
        drop(transport.socket()?);
        Ok(transport)
    }

    pub fn with_opener(binding: InterfaceBinding, opener: Arc<dyn SocketOpener>) -> Self {
        Self { binding, opener }
    }

    pub fn interface(&self) -> &str {
        &self.binding.interface
    }

    pub fn ethertype(&self) -> u16 {
        self.binding.ethertype
    }

    /// A socket scoped to the caller; closed when the box is dropped.
    pub fn socket(&self) -> Result<Box<dyn FrameSocket>, TransportError> {
        self.opener.open(&self.binding)
    }

    pub fn local_mac(&self) -> Result<MacAddr, TransportError> {
        Ok(self.socket()?.local_mac())
    }

    /// Build a frame from the local MAC and send it. No retry.
    pub fn send_frame(
        &self,
        dst: MacAddr,
        ethertype: Option<u16>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut sock = self.socket()?;
        let frame = Frame::new(
            dst,
            sock.local_mac(),
            ethertype.unwrap_or(self.binding.ethertype),
            payload,
        )?;
        sock.send_frame(&frame)
    }

    /// Send one frame and report whether the next frame received carries a
    /// byte-identical payload.
    ///
    /// Failing to send is an error; anything that goes wrong on the receive
    /// side is a negative diagnostic result, `Ok(false)`.
    pub fn send_and_expect_echo(
        &self,
        dst: MacAddr,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<bool, TransportError> {
        let mut sock = self.socket()?;
        let sent = Frame::new(dst, sock.local_mac(), self.binding.ethertype, payload)?;
        sock.send_frame(&sent)?;

        match sock.recv_frame(timeout) {
            Ok(echo) if echo.same_payload(&sent) => Ok(true),
            Ok(echo) => {
                warn!(
                    sent_len = sent.payload().len(),
                    echo_len = echo.payload().len(),
                    from = %echo.src(),
                    "echoed payload doesn't match"
                );
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "no echo");
                Ok(false)
            }
        }
    }
}
