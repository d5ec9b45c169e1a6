use thiserror::Error;

use crate::mac::MacAddr;

/// dst + src + ethertype
pub const HEADER_LEN: usize = 14;
pub const MAX_PAYLOAD: usize = 1500;
/// 1518 plus slack for a VLAN tag.
pub const MAX_FRAME_LEN: usize = 1522;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds {MAX_PAYLOAD}")]
    PayloadTooLong(usize),
    #[error("frame of {0} bytes is shorter than an Ethernet header")]
    Truncated(usize),
    #[error("frame of {0} bytes exceeds {MAX_FRAME_LEN}")]
    Oversize(usize),
    #[error("MAC address must look like aa:bb:cc:dd:ee:ff, got {0:?}")]
    BadMac(String),
    #[error("bad hex pattern: {0}")]
    BadPattern(String),
}

/// An Ethernet II frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    dst: MacAddr,
    src: MacAddr,
    ethertype: u16,
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(
        dst: MacAddr,
        src: MacAddr,
        ethertype: u16,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong(payload.len()));
        }
        Ok(Self {
            dst,
            src,
            ethertype,
            payload,
        })
    }

    /// Parse a frame as delivered by a raw socket (no FCS).
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::Truncated(bytes.len()));
        }
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::Oversize(bytes.len()));
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&bytes[0..6]);
        src.copy_from_slice(&bytes[6..12]);
        Ok(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype: u16::from_be_bytes([bytes[12], bytes[13]]),
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.dst.0);
        out.extend_from_slice(&self.src.0);
        out.extend_from_slice(&self.ethertype.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn dst(&self) -> MacAddr {
        self.dst
    }

    pub fn src(&self) -> MacAddr {
        self.src
    }

    pub fn ethertype(&self) -> u16 {
        self.ethertype
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Echo comparison: only the payload counts, a responder rewrites addresses.
    pub fn same_payload(&self, other: &Frame) -> bool {
        self.payload == other.payload
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// `i & 0xff` counting pattern used for echo tests.
pub fn counting_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i & 0xff) as u8).collect()
}

/// Parse hex bytes such as `"ff 00"` or `"DEADbeef"`; whitespace is ignored.
pub fn parse_hex_pattern(s: &str) -> Result<Vec<u8>, FrameError> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() {
        return Err(FrameError::BadPattern("empty pattern".into()));
    }
    if digits.len() % 2 != 0 {
        return Err(FrameError::BadPattern(format!("odd number of hex digits in {s:?}")));
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FrameError::BadPattern(format!("non-hex character in {s:?}")));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| FrameError::BadPattern(s.to_string()))
        })
        .collect()
}

/// Repeat `pattern` until exactly `len` bytes are filled.
pub fn fill_pattern(pattern: &[u8], len: usize) -> Vec<u8> {
    if pattern.is_empty() {
        return vec![0; len];
    }
    pattern.iter().copied().cycle().take(len).collect()
}
