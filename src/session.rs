//! One diagnostic session: preflight, the probe sequence, then isolation.

use tracing::{error, info, warn};

use crate::advice::Advice;
use crate::console::DutConsole;
use crate::isolate::{Isolation, isolate};
use crate::net::FrameTransport;
use crate::probe::{
    self, ProbeContext, ProbeKind, ProbeSettings, SessionError, Verdict, VerdictMatrix,
};

const ETH_INIT_OK: &str = "Ethernet init successful!";
const STEPS_BANNER: &str = "Steps to Test Ethernet PHY";

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// The DUT already booted; don't wait for its banners.
    pub skip_banner: bool,
    /// Run every probe even when `loopback_server` passes.
    pub always_isolate: bool,
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub matrix: VerdictMatrix,
    pub advice: Vec<Advice>,
    pub isolation: Isolation,
}

impl SessionReport {
    pub fn healthy(&self) -> bool {
        self.isolation == Isolation::NoFault
    }
}

/// Wait for the DUT to report a working Ethernet driver.
pub fn preflight(console: &mut DutConsole, settings: &ProbeSettings) -> Result<(), SessionError> {
    let timeout = settings.init_timeout;
    match console.expect_exact(ETH_INIT_OK, timeout) {
        Ok(_) => {}
        Err(e) if e.is_timeout() => {
            error!(?timeout, "DUT did not report Ethernet init");
            return Err(SessionError::DutInit);
        }
        Err(e) => return Err(probe::console_fatal(e)),
    }
    match console.expect_exact(STEPS_BANNER, timeout) {
        Ok(_) => {}
        Err(e) if e.is_timeout() => warn!("DUT test banner not seen, continuing"),
        Err(e) => return Err(probe::console_fatal(e)),
    }
    Ok(())
}

type Probe = fn(&mut ProbeContext<'_>) -> Result<Verdict, SessionError>;

/// Probes gathering more data once the full path failed, in run order.
const ISOLATION_PROBES: [(ProbeKind, Probe); 4] = [
    (ProbeKind::DutTx, probe::dut_tx),
    (ProbeKind::DutRx, probe::dut_rx),
    (ProbeKind::FarEndLoopback, probe::far_end_loopback),
    (ProbeKind::NearEndLoopback, probe::near_end_loopback),
];

pub fn run(
    console: &mut DutConsole,
    transport: &FrameTransport,
    settings: &ProbeSettings,
    options: SessionOptions,
) -> Result<SessionReport, SessionError> {
    if !options.skip_banner {
        preflight(console, settings)?;
    }

    let mut ctx = ProbeContext::new(console, transport, settings);
    let mut matrix = VerdictMatrix::new();

    let verdict = probe::loopback_server(&mut ctx)?;
    info!(probe = %ProbeKind::LoopbackServer, %verdict, "probe done");
    matrix.record(ProbeKind::LoopbackServer, verdict);

    if verdict != Verdict::Pass || options.always_isolate {
        if verdict != Verdict::Pass {
            error!("loopback server test failed");
            info!("running additional tests to isolate the problem");
        }
        for (kind, run_probe) in ISOLATION_PROBES {
            let verdict = run_probe(&mut ctx)?;
            info!(probe = %kind, %verdict, "probe done");
            matrix.record(kind, verdict);
        }
    }

    let advice = ctx.advice().to_vec();
    let isolation = isolate(&matrix);
    Ok(SessionReport {
        matrix,
        advice,
        isolation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddr;
    use crate::frame::Frame;
    use crate::net::{FrameSocket, InterfaceBinding, SocketOpener, TransportError};
    use crate::testing::{MockWire, ScriptedConsole, WireReply};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast() -> ProbeSettings {
        let short = Duration::from_millis(60);
        ProbeSettings {
            init_timeout: short,
            link_up_timeout: short,
            link_down_timeout: short,
            echo_timeout: Duration::from_millis(20),
            far_end_unsupported_grace: Duration::from_millis(40),
            near_end_result_timeout: short,
            recv_timeout: Duration::from_millis(20),
            dut_rx_report_timeout: short,
            ..ProbeSettings::default()
        }
    }

    const BOOT: &[&str] = &[
        "I (320) phy_tester: Ethernet init successful!",
        "Steps to Test Ethernet PHY:",
    ];

    #[test]
    fn healthy_path_runs_one_probe() {
        let script = ScriptedConsole::new()
            .boot(BOOT)
            .on("loop-server", &["Link Up", "Link Down"]);
        let wire = MockWire::new(WireReply::Echo);
        let mut console = DutConsole::new(Box::new(script.clone()));
        let transport = wire.transport(0x3300);
        let report = run(&mut console, &transport, &fast(), SessionOptions::default()).unwrap();

        assert!(report.healthy());
        assert_eq!(report.matrix.iter().count(), 1);
        assert_eq!(script.written(), ["loop-server -f 0x3300 -t 2000"]);
        assert_eq!(wire.open_sockets(), 0);
    }

    #[test]
    fn failing_path_runs_every_probe_and_isolates() {
        let script = ScriptedConsole::new()
            .boot(BOOT)
            .on("loop-server -f", &[])
            .on("dummy-tx", &["Link Up", "Link Down"])
            .on("loop-server -v", &["Link Up"])
            .on("loop-test", &["Link Up", "looped frames: 5, rx errors: 0", "Link Down"]);
        let wire = MockWire::new(WireReply::Silent);
        let mut hello = vec![0u8];
        hello.extend_from_slice(b"ESP32 HELLO");
        wire.inject(&Frame::new(MacAddr::BROADCAST, MockWire::DUT_MAC, 0x3300, hello).unwrap());

        let mut console = DutConsole::new(Box::new(script.clone()));
        let transport = wire.transport(0x3300);
        let report = run(&mut console, &transport, &fast(), SessionOptions::default()).unwrap();

        let m = &report.matrix;
        assert_eq!(m.get(ProbeKind::LoopbackServer), Some(Verdict::Fail));
        assert_eq!(m.get(ProbeKind::DutTx), Some(Verdict::Pass));
        assert_eq!(m.get(ProbeKind::DutRx), Some(Verdict::Fail));
        assert_eq!(m.get(ProbeKind::NearEndLoopback), Some(Verdict::Pass));
        assert_eq!(m.get(ProbeKind::FarEndLoopback), Some(Verdict::Fail));

        let Isolation::Diagnosed(d) = report.isolation else {
            panic!("expected a diagnosis");
        };
        assert!(d.rj45_rx_fail);
        assert!(!d.rj45_tx_fail && !d.rmii_rx_fail && !d.rmii_tx_fail);
        assert_eq!(report.advice, [Advice::LinkUpFailed]);

        assert_eq!(
            script.written(),
            [
                "loop-server -f 0x3300 -t 2000",
                "dummy-tx -s 256 -c 1",
                "loop-server -v -f 0x3300 -t 2000",
                "farend-loop-en -e",
                "farend-loop-en -d",
                "loop-test -s 640 -c 5",
            ]
        );
        assert_eq!(wire.open_sockets(), 0);
    }

    #[test]
    fn always_isolate_runs_everything_on_a_healthy_path() {
        let script = ScriptedConsole::new()
            .on("loop-server -f", &["Link Up", "Link Down"]);
        let wire = MockWire::new(WireReply::Echo);
        let mut console = DutConsole::new(Box::new(script.clone()));
        let options = SessionOptions {
            skip_banner: true,
            always_isolate: true,
        };
        let report = run(&mut console, &wire.transport(0x3300), &fast(), options).unwrap();
        assert!(report.healthy());
        assert_eq!(report.matrix.iter().count(), 5);
    }

    #[test]
    fn missing_init_banner_is_fatal() {
        let script =
            ScriptedConsole::new().boot(&["E (300) esp.emac: emac_esp32_init: reset timeout"]);
        let wire = MockWire::new(WireReply::Echo);
        let mut console = DutConsole::new(Box::new(script.clone()));
        let transport = wire.transport(0x3300);
        let err = run(&mut console, &transport, &fast(), SessionOptions::default()).unwrap_err();
        assert!(matches!(err, SessionError::DutInit));
        assert!(script.written().is_empty());
    }

    struct Denied;

    impl SocketOpener for Denied {
        fn open(&self, _: &InterfaceBinding) -> Result<Box<dyn FrameSocket>, TransportError> {
            Err(TransportError::PermissionDenied)
        }
    }

    #[test]
    fn permission_error_aborts_the_session() {
        let script = ScriptedConsole::new().boot(BOOT).on("loop-server", &["Link Up"]);
        let transport = FrameTransport::with_opener(
            InterfaceBinding {
                interface: "eth0".into(),
                ethertype: 0x3300,
            },
            Arc::new(Denied),
        );
        let mut console = DutConsole::new(Box::new(script.clone()));
        let err = run(&mut console, &transport, &fast(), SessionOptions::default()).unwrap_err();
        assert!(matches!(err, SessionError::Environment(TransportError::PermissionDenied)));
        assert_eq!(script.written().len(), 1);
    }

    #[test]
    fn lost_console_is_fatal() {
        let script = ScriptedConsole::new().boot(BOOT);
        let wire = MockWire::new(WireReply::Echo);
        let mut console = DutConsole::new(Box::new(script.clone()));
        script.disconnect();
        let transport = wire.transport(0x3300);
        let err = run(&mut console, &transport, &fast(), SessionOptions::default()).unwrap_err();
        assert!(matches!(err, SessionError::Console(_)));
    }
}
