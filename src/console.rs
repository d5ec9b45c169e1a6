//! Line-oriented view of the DUT's text console.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Unmatched lines kept for later expectations.
const BACKLOG_LINES: usize = 512;
const MAX_LINE: usize = 4096;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("timed out after {timeout:?} waiting for {expected:?}")]
    Timeout { expected: String, timeout: Duration },
    #[error("console i/o: {0}")]
    Io(#[from] io::Error),
}

impl ConsoleError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConsoleError::Timeout { .. })
    }
}

/// Anything the console can sit on: a serial port, or a script in tests.
pub trait ConsoleIo: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> ConsoleIo for T {}

/// Writes command lines and waits for tokens in what the DUT prints back.
///
/// Output read while waiting but not matched stays in a backlog, so a later
/// expectation can still find a line printed before it was asked for.
pub struct DutConsole {
    io: Box<dyn ConsoleIo>,
    partial: Vec<u8>,
    backlog: VecDeque<String>,
}

impl DutConsole {
    pub fn new(io: Box<dyn ConsoleIo>) -> Self {
        Self {
            io,
            partial: Vec::with_capacity(256),
            backlog: VecDeque::new(),
        }
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), ConsoleError> {
        debug!(target: "dut", "<- {}", line);
        let mut out = Vec::with_capacity(line.len() + 1);
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
        self.io.write_all(&out)?;
        self.io.flush()?;
        Ok(())
    }

    /// Wait for a line containing `token`; returns that line.
    pub fn expect_exact(&mut self, token: &str, timeout: Duration) -> Result<String, ConsoleError> {
        self.expect_with(token, timeout, |line| line.contains(token).then(|| line.to_string()))
    }

    /// Wait for the first line `matcher` accepts.
    ///
    /// On a match, everything up to and including that line is consumed.
    /// On timeout nothing is consumed.
    pub fn expect_with<T>(
        &mut self,
        expected: &str,
        timeout: Duration,
        mut matcher: impl FnMut(&str) -> Option<T>,
    ) -> Result<T, ConsoleError> {
        let deadline = Instant::now() + timeout;
        let mut scanned = 0;
        loop {
            while scanned < self.backlog.len() {
                if let Some(v) = matcher(&self.backlog[scanned]) {
                    self.backlog.drain(..=scanned);
                    return Ok(v);
                }
                scanned += 1;
            }
            if Instant::now() >= deadline {
                return Err(ConsoleError::Timeout {
                    expected: expected.to_string(),
                    timeout,
                });
            }
            let dropped = self.read_chunk()?;
            scanned = scanned.saturating_sub(dropped);
        }
    }

    /// Read whatever is available and split it into lines.
    /// Returns how many old backlog lines were evicted.
    fn read_chunk(&mut self) -> Result<usize, ConsoleError> {
        let mut buf = [0u8; 256];
        let n = match self.io.read(&mut buf) {
            Ok(0) => {
                std::thread::sleep(Duration::from_millis(5));
                return Ok(0);
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        for &b in &buf[..n] {
            if b == b'\n' || self.partial.len() >= MAX_LINE {
                self.push_line();
                if b == b'\n' {
                    continue;
                }
            }
            self.partial.push(b);
        }

        let mut dropped = 0;
        while self.backlog.len() > BACKLOG_LINES {
            self.backlog.pop_front();
            dropped += 1;
        }
        Ok(dropped)
    }

    fn push_line(&mut self) {
        let raw = String::from_utf8_lossy(&self.partial);
        let line = strip_ansi(raw.trim_end_matches('\r'));
        self.partial.clear();
        debug!(target: "dut", "-> {}", line);
        self.backlog.push_back(line);
    }
}

/// Remove ANSI CSI sequences (`ESC [ ... final`), as emitted by coloured logs.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
