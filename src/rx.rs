use std::time::Duration;

use tracing::{debug, info, warn};

use crate::net::{FrameTransport, TransportError};
use crate::stats::Stats;
use crate::traffic::CancelSignal;

const POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Stop after this many frames; `None` = until cancelled.
    pub count: Option<u64>,
    /// Seconds between rate reports.
    pub stats_interval: f64,
}

/// Count sequence-numbered frames arriving on the transport's Ethertype.
pub fn run(
    transport: &FrameTransport,
    config: &MonitorConfig,
    cancel: &CancelSignal,
) -> Result<Stats, TransportError> {
    let mut sock = transport.socket()?;
    let mut stats = Stats::new();
    info!(
        interface = transport.interface(),
        ethertype = format_args!("{:#06x}", transport.ethertype()),
        "starting receive loop"
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if let Some(max) = config.count
            && stats.ok >= max
        {
            break;
        }

        match sock.recv_frame(POLL) {
            Ok(frame) => {
                let gap = stats.record(frame.payload(), frame.wire_len());
                if gap > 0 {
                    debug!(
                        seq = frame.payload()[0],
                        lost = gap,
                        from = %frame.src(),
                        "sequence gap"
                    );
                }
            }
            Err(TransportError::Timeout(_)) => {}
            Err(TransportError::Frame(e)) => warn!(error = %e, "malformed frame"),
            Err(e) => return Err(e),
        }

        stats.maybe_log(config.stats_interval);
    }

    info!(ok = stats.ok, lost = stats.lost, bytes = stats.bytes, "receive loop done");
    Ok(stats)
}
