use anyhow::{Context, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::thread;
use std::time::Duration;
use tracing::info;

use crate::cli::SerialOpts;

/// Open the DUT console: 8N1, no flow control, short read timeout so
/// expectations can poll their deadlines.
pub fn open_port(opts: &SerialOpts) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(&opts.dev, opts.baud)
        .timeout(Duration::from_millis(100))
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None);

    let mut port = builder.open().with_context(|| format!("open {}", opts.dev))?;
    // Both lines released, or the DUT may sit in reset or in its bootloader.
    port.write_data_terminal_ready(false)
        .and_then(|_| port.write_request_to_send(false))
        .with_context(|| format!("set modem lines on {}", opts.dev))?;
    Ok(port)
}

/// Pulse the DUT's EN pin through RTS, with DTR (boot strap) released.
pub fn pulse_reset(port: &mut dyn SerialPort) -> Result<()> {
    info!("resetting DUT");
    port.write_data_terminal_ready(false)?;
    port.write_request_to_send(true)?;
    thread::sleep(Duration::from_millis(100));
    port.write_request_to_send(false)?;
    Ok(())
}
