//! The five diagnostic probes and the state they share within one session.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, warn};

use crate::advice::Advice;
use crate::console::{ConsoleError, DutConsole};
use crate::mac::MacAddr;
use crate::net::{FrameTransport, TransportError};

pub mod dut;
pub mod loopback;

pub use dut::{dut_rx, dut_tx};
pub use loopback::{far_end_loopback, loopback_server, near_end_loopback};

pub const LINK_UP: &str = "Link Up";
pub const LINK_DOWN: &str = "Link Down";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pass,
    Fail,
    /// Only the far-end probe yields this: the PHY can't do that loopback.
    NotSupported,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::NotSupported => "NOT SUPPORTED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProbeKind {
    LoopbackServer,
    DutTx,
    DutRx,
    NearEndLoopback,
    FarEndLoopback,
}

impl ProbeKind {
    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::LoopbackServer => "loopback_server",
            ProbeKind::DutTx => "dut_tx",
            ProbeKind::DutRx => "dut_rx",
            ProbeKind::NearEndLoopback => "near_end_loopback",
            ProbeKind::FarEndLoopback => "far_end_loopback",
        }
    }

    /// Heading used in the operator report.
    pub fn label(self) -> &'static str {
        match self {
            ProbeKind::LoopbackServer => "Loopback server",
            ProbeKind::DutTx => "DUT tx",
            ProbeKind::DutRx => "DUT rx",
            ProbeKind::NearEndLoopback => "Near-end loopback",
            ProbeKind::FarEndLoopback => "Far-end loopback",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Verdicts gathered during one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerdictMatrix {
    verdicts: BTreeMap<ProbeKind, Verdict>,
}

impl VerdictMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, probe: ProbeKind, verdict: Verdict) {
        self.verdicts.insert(probe, verdict);
    }

    #[cfg(test)]
    pub fn with(mut self, probe: ProbeKind, verdict: Verdict) -> Self {
        self.record(probe, verdict);
        self
    }

    pub fn get(&self, probe: ProbeKind) -> Option<Verdict> {
        self.verdicts.get(&probe).copied()
    }

    pub fn is(&self, probe: ProbeKind, verdict: Verdict) -> bool {
        self.get(probe) == Some(verdict)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (ProbeKind, Verdict)> + '_ {
        self.verdicts.iter().map(|(k, v)| (*k, *v))
    }
}

/// Commands, sizes and timeouts the probes use.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub ethertype: u16,
    /// Wait for the DUT to finish booting and print its banners.
    pub init_timeout: Duration,
    /// Destination for PC-originated frames.
    pub target: MacAddr,
    pub link_up_timeout: Duration,
    /// Best-effort wait for the DUT to drop the link after a probe.
    pub link_down_timeout: Duration,
    /// `loop-server -t` window in ms.
    pub loop_server_window_ms: u32,
    pub echo_payload_len: usize,
    pub echo_timeout: Duration,
    /// How long to look for the "not supported" message once far-end link-up timed out.
    pub far_end_unsupported_grace: Duration,
    pub near_end_frames: u32,
    pub near_end_frame_len: usize,
    pub near_end_result_timeout: Duration,
    pub dut_tx_frame_len: usize,
    pub dut_tx_count: u32,
    pub dut_tx_marker: String,
    pub recv_timeout: Duration,
    pub dut_rx_payload_len: usize,
    pub dut_rx_report_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ethertype: 0x3300,
            init_timeout: Duration::from_secs(30),
            target: MacAddr::BROADCAST,
            link_up_timeout: Duration::from_secs(6),
            link_down_timeout: Duration::from_secs(10),
            loop_server_window_ms: 2000,
            echo_payload_len: 1010,
            echo_timeout: Duration::from_secs(5),
            far_end_unsupported_grace: Duration::from_secs(1),
            near_end_frames: 5,
            near_end_frame_len: 640,
            near_end_result_timeout: Duration::from_secs(10),
            dut_tx_frame_len: 256,
            dut_tx_count: 1,
            dut_tx_marker: "ESP32 HELLO".to_string(),
            recv_timeout: Duration::from_secs(5),
            dut_rx_payload_len: 50,
            dut_rx_report_timeout: Duration::from_secs(4),
        }
    }
}

/// Errors that end the whole session rather than one probe.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Environment(TransportError),
    #[error("DUT console failed: {0}")]
    Console(#[source] io::Error),
    #[error("DUT did not report successful Ethernet initialization")]
    DutInit,
}

/// What a probe needs: the console, the transport, settings, and a place
/// to note advice for the operator.
pub struct ProbeContext<'a> {
    pub console: &'a mut DutConsole,
    pub transport: &'a FrameTransport,
    pub settings: &'a ProbeSettings,
    advice: Vec<Advice>,
}

impl<'a> ProbeContext<'a> {
    pub fn new(
        console: &'a mut DutConsole,
        transport: &'a FrameTransport,
        settings: &'a ProbeSettings,
    ) -> Self {
        Self {
            console,
            transport,
            settings,
            advice: Vec::new(),
        }
    }

    pub fn advise(&mut self, advice: Advice) {
        if !self.advice.contains(&advice) {
            self.advice.push(advice);
        }
    }

    pub fn advice(&self) -> &[Advice] {
        &self.advice
    }

    pub fn send(&mut self, line: &str) -> Result<(), SessionError> {
        self.console.write_line(line).map_err(console_fatal)
    }

    /// `Ok(None)` on timeout, which the probe turns into a verdict.
    pub fn expect(
        &mut self,
        token: &str,
        timeout: Duration,
    ) -> Result<Option<String>, SessionError> {
        timed_out(self.console.expect_exact(token, timeout))
    }

    pub fn expect_with<T>(
        &mut self,
        expected: &str,
        timeout: Duration,
        matcher: impl FnMut(&str) -> Option<T>,
    ) -> Result<Option<T>, SessionError> {
        timed_out(self.console.expect_with(expected, timeout, matcher))
    }

    /// Wait for link-up; on timeout note the advice and report `false`.
    pub fn wait_link_up(&mut self, probe: ProbeKind) -> Result<bool, SessionError> {
        let timeout = self.settings.link_up_timeout;
        if self.expect(LINK_UP, timeout)?.is_some() {
            return Ok(true);
        }
        error!(%probe, ?timeout, "link failed to come up");
        self.advise(Advice::LinkUpFailed);
        Ok(false)
    }

    /// Best-effort: let the DUT drop the link before the next probe.
    pub fn settle_link_down(&mut self, probe: ProbeKind) -> Result<(), SessionError> {
        let timeout = self.settings.link_down_timeout;
        if self.expect(LINK_DOWN, timeout)?.is_none() {
            warn!(%probe, ?timeout, "DUT did not report link down");
        }
        Ok(())
    }
}

pub(crate) fn console_fatal(e: ConsoleError) -> SessionError {
    match e {
        ConsoleError::Io(io) => SessionError::Console(io),
        ConsoleError::Timeout { expected, timeout } => SessionError::Console(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("timed out after {timeout:?} waiting for {expected:?}"),
        )),
    }
}

fn timed_out<T>(r: Result<T, ConsoleError>) -> Result<Option<T>, SessionError> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(ConsoleError::Timeout { .. }) => Ok(None),
        Err(e) => Err(console_fatal(e)),
    }
}

/// Environment problems end the session; any other transport failure
/// becomes `Ok(None)`, i.e. a failed probe, after being logged.
pub fn transport_outcome<T>(
    probe: ProbeKind,
    r: Result<T, TransportError>,
) -> Result<Option<T>, SessionError> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_environment() => Err(SessionError::Environment(e)),
        Err(e) => {
            error!(%probe, error = %e, "transport failure");
            Ok(None)
        }
    }
}
