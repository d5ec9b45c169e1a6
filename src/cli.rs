use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::frame::{MAX_PAYLOAD, parse_hex_pattern};
use crate::mac::MacAddr;
use crate::probe::ProbeSettings;
use crate::rx::MonitorConfig;
use crate::session::SessionOptions;
use crate::traffic::TrafficConfig;

pub const DEFAULT_ETHERTYPE: &str = "0x3300";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "eth-phy-probe",
    about = "Ethernet PHY tester: drives the DUT console and raw frames to locate link faults"
)]
pub struct Cli {
    /// Test PC NIC connected to the DUT. Empty picks the first eth*/enp*/eno* interface.
    #[arg(long, global = true, default_value = "")]
    pub eth_nic: String,
    /// Verbose logging, including the DUT console traffic
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Generate dummy Ethernet transmissions for probing signals on the board
    DummyTx(DummyTxOpts),
    /// Run the probe session against a DUT and print the isolation report
    Test(TestOpts),
    /// Count sequence-numbered frames arriving from the DUT
    RxMonitor(RxMonitorOpts),
}

#[derive(Args, Debug, Clone)]
pub struct SerialOpts {
    /// DUT console device path
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
}

#[derive(Args, Debug, Clone)]
pub struct DummyTxOpts {
    /// Seconds between frames
    #[arg(long, default_value_t = 0.5, allow_negative_numbers = true)]
    pub interval: f64,
    /// Number of frames; -1 sends until interrupted
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub count: i64,
    /// Ethertype in hex
    #[arg(long, default_value = DEFAULT_ETHERTYPE, value_parser = parse_ethertype)]
    pub ethertype: u16,
    /// Payload size in bytes
    #[arg(long, default_value_t = 512)]
    pub size: usize,
    /// Destination MAC address
    #[arg(long, default_value = "ff:ff:ff:ff:ff:ff")]
    pub destination_mac: MacAddr,
    /// Payload pattern, repeated to the end of the frame (e.g. "ff 00")
    #[arg(long, default_value = "ff 00")]
    pub pattern: String,
}

#[derive(Args, Debug, Clone)]
pub struct TestOpts {
    #[command(flatten)]
    pub ser: SerialOpts,
    /// Ethertype of the test frames, in hex
    #[arg(long, default_value = DEFAULT_ETHERTYPE, value_parser = parse_ethertype)]
    pub ethertype: u16,
    /// Destination MAC of frames sent to the DUT
    #[arg(long, default_value = "ff:ff:ff:ff:ff:ff")]
    pub target_mac: MacAddr,
    /// String the DUT puts in its dummy frames
    #[arg(long, default_value = "ESP32 HELLO")]
    pub tx_marker: String,
    /// Reset the DUT through RTS before waiting for it to boot
    #[arg(long, default_value_t = false)]
    pub reset: bool,
    /// The DUT is already up; don't wait for its boot banner
    #[arg(long, default_value_t = false)]
    pub skip_banner: bool,
    /// Run all probes even when the loopback server test passes
    #[arg(long, default_value_t = false)]
    pub always_isolate: bool,
    /// Plain report without colours
    #[arg(long, default_value_t = false)]
    pub no_color: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RxMonitorOpts {
    /// Ethertype to listen for, in hex
    #[arg(long, default_value = DEFAULT_ETHERTYPE, value_parser = parse_ethertype)]
    pub ethertype: u16,
    /// Stop after this many frames
    #[arg(long)]
    pub count: Option<u64>,
    /// Stats print interval in seconds
    #[arg(long, default_value_t = 1.0)]
    pub stats: f64,
}

/// `0x3300`, `3300` and `0X3300` all mean the same.
pub fn parse_ethertype(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid Ethertype {s:?}: {e}"))
}

impl DummyTxOpts {
    pub fn traffic_config(&self) -> anyhow::Result<TrafficConfig> {
        if self.size > MAX_PAYLOAD {
            return Err(anyhow!("payload size {} exceeds {MAX_PAYLOAD} bytes", self.size));
        }
        let interval = Duration::try_from_secs_f64(self.interval).map_err(|e| {
            anyhow!("interval must be a non-negative number of seconds, got {}: {e}", self.interval)
        })?;
        let count = match self.count {
            -1 => None,
            n if n >= 0 => Some(n as u64),
            n => return Err(anyhow!("count must be -1 or non-negative, got {n}")),
        };
        let pattern = parse_hex_pattern(&self.pattern).context("--pattern")?;
        Ok(TrafficConfig {
            destination: self.destination_mac,
            ethertype: Some(self.ethertype),
            count,
            payload_len: self.size,
            pattern,
            interval,
        })
    }
}

impl TestOpts {
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            ethertype: self.ethertype,
            target: self.target_mac,
            dut_tx_marker: self.tx_marker.clone(),
            ..ProbeSettings::default()
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            skip_banner: self.skip_banner,
            always_isolate: self.always_isolate,
        }
    }
}

impl RxMonitorOpts {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            count: self.count,
            stats_interval: self.stats,
        }
    }
}
