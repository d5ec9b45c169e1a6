//! Continuous frame generator for probing signals on the board.
//!
//! Byte 0 of every payload is a wrapping sequence counter, so a receiver can
//! infer loss from gaps.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use tracing::{debug, info};

use crate::frame::{Frame, fill_pattern};
use crate::mac::MacAddr;
use crate::net::{FrameTransport, TransportError};

#[derive(Debug, Clone)]
pub struct TrafficConfig {
    pub destination: MacAddr,
    /// Frame Ethertype; `None` uses the transport's.
    pub ethertype: Option<u16>,
    /// `None` = until cancelled.
    pub count: Option<u64>,
    pub payload_len: usize,
    pub pattern: Vec<u8>,
    pub interval: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficSummary {
    pub frames: u64,
    pub bytes: u64,
    pub cancelled: bool,
}

/// Sending half of a cancel channel.
#[derive(Debug, Clone)]
pub struct CancelHandle(Sender<()>);

impl CancelHandle {
    pub fn cancel(&self) {
        // Full or disconnected both mean the generator already knows.
        let _ = self.0.try_send(());
    }
}

/// Receiving half, polled by the generator. A dropped handle counts as
/// cancellation.
#[derive(Debug, Clone)]
pub struct CancelSignal(Receiver<()>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        !matches!(self.0.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `d`, waking early on cancel. Returns true if cancelled.
    pub fn wait(&self, d: Duration) -> bool {
        if d.is_zero() {
            return self.is_cancelled();
        }
        !matches!(self.0.recv_timeout(d), Err(RecvTimeoutError::Timeout))
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = bounded(1);
    (CancelHandle(tx), CancelSignal(rx))
}

/// Send frames until `cancel` fires or `config.count` frames went out.
///
/// Holds one socket for the whole run; any send failure ends the run.
pub fn run(
    transport: &FrameTransport,
    config: &TrafficConfig,
    cancel: &CancelSignal,
) -> Result<TrafficSummary, TransportError> {
    let mut sock = transport.socket()?;
    let ethertype = config.ethertype.unwrap_or(transport.ethertype());
    let mut payload = fill_pattern(&config.pattern, config.payload_len);
    let mut seq: u8 = 0;
    let mut summary = TrafficSummary::default();

    info!(
        dst = %config.destination,
        ethertype = format_args!("{:#06x}", ethertype),
        len = config.payload_len,
        count = ?config.count,
        interval = ?config.interval,
        "starting dummy transmissions"
    );
    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        if let Some(max) = config.count
            && summary.frames >= max
        {
            break;
        }

        if let Some(first) = payload.first_mut() {
            *first = seq;
        }
        let frame = Frame::new(
            config.destination,
            sock.local_mac(),
            ethertype,
            payload.as_slice(),
        )?;
        sock.send_frame(&frame)?;
        debug!(seq, "sent");
        seq = seq.wrapping_add(1);
        summary.frames += 1;
        summary.bytes += frame.wire_len() as u64;

        if cancel.wait(config.interval) {
            summary.cancelled = true;
            break;
        }
    }

    info!(
        frames = summary.frames,
        bytes = summary.bytes,
        elapsed = ?started.elapsed(),
        cancelled = summary.cancelled,
        "dummy transmissions finished"
    );
    Ok(summary)
}

/// A generator running on its own thread.
pub struct TrafficHandle {
    cancel: CancelHandle,
    join: JoinHandle<Result<TrafficSummary, TransportError>>,
}

pub fn spawn(transport: FrameTransport, config: TrafficConfig) -> std::io::Result<TrafficHandle> {
    let (cancel, signal) = cancel_pair();
    let join = thread::Builder::new()
        .name("traffic-gen".into())
        .spawn(move || run(&transport, &config, &signal))?;
    Ok(TrafficHandle { cancel, join })
}

impl TrafficHandle {
    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the generator to finish.
    pub fn join(self) -> Result<TrafficSummary, TransportError> {
        self.join.join().unwrap_or_else(|_| {
            Err(TransportError::Io(std::io::Error::other("traffic generator panicked")))
        })
    }

    /// Cancel, then wait up to `grace`. Gives the handle back if the thread
    /// is still stuck (e.g. blocked in a send).
    pub fn stop(self, grace: Duration) -> Result<Result<TrafficSummary, TransportError>, Self> {
        self.cancel();
        let deadline = Instant::now() + grace;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return Err(self);
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(self.join())
    }
}
