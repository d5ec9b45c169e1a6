//! In-memory stand-ins for the DUT console and the raw socket.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::frame::Frame;
use crate::mac::MacAddr;
use crate::net::{FrameSocket, FrameTransport, InterfaceBinding, SocketOpener, TransportError};

struct Rule {
    prefix: String,
    lines: Vec<String>,
    used: bool,
}

#[derive(Default)]
struct ConsoleState {
    rules: Vec<Rule>,
    out: VecDeque<u8>,
    written: Vec<String>,
    pending: Vec<u8>,
    disconnected: bool,
}

/// A DUT that answers command lines with canned output.
///
/// Each rule fires once, for the first written line starting with its
/// prefix; rules are tried in the order they were added.
#[derive(Clone, Default)]
pub struct ScriptedConsole {
    state: Arc<Mutex<ConsoleState>>,
}

impl ScriptedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output available before anything is written.
    pub fn boot(self, lines: &[&str]) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            for l in lines {
                st.out.extend(l.as_bytes());
                st.out.extend(b"\r\n");
            }
        }
        self
    }

    pub fn on(self, prefix: &str, lines: &[&str]) -> Self {
        self.state.lock().unwrap().rules.push(Rule {
            prefix: prefix.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            used: false,
        });
        self
    }

    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn disconnect(&self) {
        self.state.lock().unwrap().disconnected = true;
    }
}

impl Read for ScriptedConsole {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut st = self.state.lock().unwrap();
        if st.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "console gone"));
        }
        if st.out.is_empty() {
            drop(st);
            std::thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(st.out.len());
        for (slot, b) in buf.iter_mut().zip(st.out.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

impl Write for ScriptedConsole {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut st = self.state.lock().unwrap();
        if st.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "console gone"));
        }
        st.pending.extend_from_slice(buf);
        while let Some(pos) = st.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = st.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            let reply = st
                .rules
                .iter_mut()
                .find(|r| !r.used && line.starts_with(&r.prefix))
                .map(|r| {
                    r.used = true;
                    r.lines.clone()
                });
            for l in reply.into_iter().flatten() {
                st.out.extend(l.as_bytes());
                st.out.extend(b"\r\n");
            }
            st.written.push(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// How the far side of the [`MockWire`] reacts to a transmitted frame.
#[derive(Debug, Clone)]
pub enum WireReply {
    Silent,
    /// Loop the frame back with swapped addresses.
    Echo,
    /// Loop back with one payload byte flipped.
    EchoMutated { index: usize },
}

struct WireState {
    reply: WireReply,
    sent: Vec<Frame>,
    inbound: VecDeque<Vec<u8>>,
    fail_sends: bool,
    open: usize,
    opened_total: usize,
}

/// Shared fake cable behind every socket a [`FrameTransport`] opens.
#[derive(Clone)]
pub struct MockWire {
    state: Arc<Mutex<WireState>>,
}

impl MockWire {
    pub const PC_MAC: MacAddr = MacAddr([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01]);
    pub const DUT_MAC: MacAddr = MacAddr([0x24, 0x0a, 0xc4, 0x00, 0x00, 0x02]);

    pub fn new(reply: WireReply) -> Self {
        Self {
            state: Arc::new(Mutex::new(WireState {
                reply,
                sent: Vec::new(),
                inbound: VecDeque::new(),
                fail_sends: false,
                open: 0,
                opened_total: 0,
            })),
        }
    }

    pub fn transport(&self, ethertype: u16) -> FrameTransport {
        FrameTransport::with_opener(
            InterfaceBinding {
                interface: "eth0".into(),
                ethertype,
            },
            Arc::new(self.clone()),
        )
    }

    /// Queue a frame for the PC to receive.
    pub fn inject(&self, frame: &Frame) {
        self.state.lock().unwrap().inbound.push_back(frame.to_bytes());
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Sockets currently open.
    pub fn open_sockets(&self) -> usize {
        self.state.lock().unwrap().open
    }

    pub fn opened_total(&self) -> usize {
        self.state.lock().unwrap().opened_total
    }
}

impl SocketOpener for MockWire {
    fn open(&self, _binding: &InterfaceBinding) -> Result<Box<dyn FrameSocket>, TransportError> {
        let mut st = self.state.lock().unwrap();
        st.open += 1;
        st.opened_total += 1;
        Ok(Box::new(MockSocket { wire: self.clone() }))
    }
}

struct MockSocket {
    wire: MockWire,
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        self.wire.state.lock().unwrap().open -= 1;
    }
}

impl FrameSocket for MockSocket {
    fn local_mac(&self) -> MacAddr {
        MockWire::PC_MAC
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut st = self.wire.state.lock().unwrap();
        if st.fail_sends {
            return Err(TransportError::Send(io::Error::other("mock send failure")));
        }
        let frame = Frame::parse(bytes)?;
        let mut payload = frame.payload().to_vec();
        let reply = match st.reply {
            WireReply::Silent => None,
            WireReply::Echo => Some(payload),
            WireReply::EchoMutated { index } => {
                if let Some(b) = payload.get_mut(index) {
                    *b ^= 0x01;
                }
                Some(payload)
            }
        };
        if let Some(p) = reply {
            let echo = Frame::new(frame.src(), MockWire::DUT_MAC, frame.ethertype(), p)?;
            st.inbound.push_back(echo.to_bytes());
        }
        st.sent.push(frame);
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let mut st = self.wire.state.lock().unwrap();
        match st.inbound.pop_front() {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            None => Err(TransportError::Timeout(timeout)),
        }
    }
}
