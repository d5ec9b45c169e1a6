//! Single-direction probes through the DUT MAC: DUT -> PC and PC -> DUT.

use tracing::{error, info};

use crate::frame::{HEADER_LEN, counting_payload};
use crate::mac::MacAddr;

use super::{ProbeContext, ProbeKind, SessionError, Verdict, transport_outcome};

/// One row of the DUT's frame hexdump, up to the Ethertype:
/// 8 bytes, a double space, 6 more bytes.
const HEADER_DUMP: &[u8] = b"xx xx xx xx xx xx xx xx  xx xx xx xx xx xx";

/// DUT MAC -> PHY -> PC: the DUT sends a frame carrying a marker string.
pub fn dut_tx(ctx: &mut ProbeContext<'_>) -> Result<Verdict, SessionError> {
    let probe = ProbeKind::DutTx;
    // Listen before the DUT starts sending.
    let Some(mut sock) = transport_outcome(probe, ctx.transport.socket())? else {
        return Ok(Verdict::Fail);
    };

    ctx.send(&format!(
        "dummy-tx -s {} -c {}",
        ctx.settings.dut_tx_frame_len, ctx.settings.dut_tx_count
    ))?;
    if !ctx.wait_link_up(probe)? {
        return Ok(Verdict::Fail);
    }

    let marker = ctx.settings.dut_tx_marker.as_bytes();
    let verdict = match sock.recv_frame(ctx.settings.recv_timeout) {
        // byte 0 is the DUT's sequence number
        Ok(frame) if contains(frame.payload().get(1..).unwrap_or_default(), marker) => {
            info!(%probe, from = %frame.src(), len = frame.payload().len(), "received DUT frame");
            Verdict::Pass
        }
        Ok(frame) => {
            error!(%probe, from = %frame.src(), "received frame does not contain expected marker");
            Verdict::Fail
        }
        Err(e) => {
            error!(%probe, error = %e, "no frame from DUT");
            Verdict::Fail
        }
    };
    drop(sock);

    ctx.settle_link_down(probe)?;
    Ok(verdict)
}

/// PC -> PHY -> DUT MAC: the DUT prints the header of what it received.
pub fn dut_rx(ctx: &mut ProbeContext<'_>) -> Result<Verdict, SessionError> {
    let probe = ProbeKind::DutRx;
    let ethertype = ctx.settings.ethertype;
    ctx.send(&format!(
        "loop-server -v -f {:#x} -t {}",
        ethertype, ctx.settings.loop_server_window_ms
    ))?;
    if !ctx.wait_link_up(probe)? {
        return Ok(Verdict::Fail);
    }

    let verdict = match check_dut_rx(ctx, probe)? {
        Some(true) => Verdict::Pass,
        _ => Verdict::Fail,
    };
    ctx.settle_link_down(probe)?;
    Ok(verdict)
}

/// `None` when the frame could not be sent or the DUT didn't report it.
fn check_dut_rx(
    ctx: &mut ProbeContext<'_>,
    probe: ProbeKind,
) -> Result<Option<bool>, SessionError> {
    let target = ctx.settings.target;
    let ethertype = ctx.settings.ethertype;
    let payload = counting_payload(ctx.settings.dut_rx_payload_len);

    let Some(host_mac) = transport_outcome(probe, ctx.transport.local_mac())? else {
        return Ok(None);
    };
    if transport_outcome(probe, ctx.transport.send_frame(target, None, &payload))?.is_none() {
        return Ok(None);
    }

    let frame_len = payload.len() + HEADER_LEN;
    let timeout = ctx.settings.dut_rx_report_timeout;
    let reported = ctx.expect_with(&format!("receive len= {frame_len}"), timeout, |line| {
        (parse_receive_len(line)? == frame_len).then_some(())
    })?;
    if reported.is_none() {
        error!(%probe, frame_len, "expected frame was not received by DUT");
        return Ok(None);
    }
    let header = ctx.expect_with("frame header hexdump", timeout, parse_header_dump)?;
    let Some((dst, src, rx_type)) = header else {
        error!(%probe, "DUT did not dump the received frame");
        return Ok(None);
    };

    let ok = dst == target && src == host_mac && rx_type == ethertype;
    if !ok {
        error!(
            %probe,
            %dst, %src, ethertype = format_args!("{rx_type:#06x}"),
            expected_dst = %target, expected_src = %host_mac,
            "DUT received a different header"
        );
    }
    Ok(Some(ok))
}

/// Length from the DUT MAC driver's `esp.emac: receive len= N` line.
fn parse_receive_len(line: &str) -> Option<usize> {
    let (_, rest) = line.split_once("esp.emac: receive len=")?;
    let digits = rest.trim_start();
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse().ok()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Find the first hexdump row in `line` and read destination, source and
/// Ethertype from it.
fn parse_header_dump(line: &str) -> Option<(MacAddr, MacAddr, u16)> {
    let bytes = line.as_bytes();
    let start = (0..=bytes.len().checked_sub(HEADER_DUMP.len())?).find(|&i| {
        bytes[i..i + HEADER_DUMP.len()]
            .iter()
            .zip(HEADER_DUMP)
            .all(|(b, t)| if *t == b'x' { b.is_ascii_hexdigit() } else { b == t })
    })?;

    let dump = &line[start..start + HEADER_DUMP.len()];
    let mut octets = [0u8; HEADER_LEN];
    for (slot, hex) in octets.iter_mut().zip(dump.split_ascii_whitespace()) {
        *slot = u8::from_str_radix(hex, 16).ok()?;
    }
    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&octets[..6]);
    src.copy_from_slice(&octets[6..12]);
    Some((MacAddr(dst), MacAddr(src), u16::from_be_bytes([octets[12], octets[13]])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::DutConsole;
    use crate::frame::Frame;
    use crate::probe::ProbeSettings;
    use crate::testing::{MockWire, ScriptedConsole, WireReply};
    use std::time::Duration;

    fn fast() -> ProbeSettings {
        ProbeSettings {
            link_up_timeout: Duration::from_millis(60),
            link_down_timeout: Duration::from_millis(60),
            recv_timeout: Duration::from_millis(20),
            dut_rx_report_timeout: Duration::from_millis(60),
            ..ProbeSettings::default()
        }
    }

    fn run(
        script: &ScriptedConsole,
        wire: &MockWire,
        probe: fn(&mut ProbeContext<'_>) -> Result<Verdict, SessionError>,
    ) -> Verdict {
        let settings = fast();
        let mut console = DutConsole::new(Box::new(script.clone()));
        let transport = wire.transport(settings.ethertype);
        let mut ctx = ProbeContext::new(&mut console, &transport, &settings);
        probe(&mut ctx).unwrap()
    }

    fn dut_frame(text: &[u8]) -> Frame {
        let mut payload = vec![7u8];
        payload.extend_from_slice(text);
        payload.resize(256, 0);
        Frame::new(MacAddr::BROADCAST, MockWire::DUT_MAC, 0x3300, payload).unwrap()
    }

    const PC_DUMP: &str =
        "I (2210) : 0x3fcb5e3c   ff ff ff ff ff ff 02 00  5e 10 00 01 33 00 00 01  |........^...3...|";

    #[test]
    fn dut_tx_finds_marker_after_sequence_byte() {
        let script = ScriptedConsole::new().on("dummy-tx", &["Link Up", "Link Down"]);
        let wire = MockWire::new(WireReply::Silent);
        wire.inject(&dut_frame(b"ESP32 HELLO"));
        assert_eq!(run(&script, &wire, dut_tx), Verdict::Pass);
        assert_eq!(script.written(), ["dummy-tx -s 256 -c 1"]);
        assert_eq!(wire.open_sockets(), 0);
    }

    #[test]
    fn dut_tx_marker_in_sequence_byte_does_not_count() {
        let script = ScriptedConsole::new().on("dummy-tx", &["Link Up"]);
        let wire = MockWire::new(WireReply::Silent);
        let mut payload = b"ESP32 HELLO".to_vec();
        payload.resize(64, 0);
        wire.inject(&Frame::new(MacAddr::BROADCAST, MockWire::DUT_MAC, 0x3300, payload).unwrap());
        assert_eq!(run(&script, &wire, dut_tx), Verdict::Fail);
    }

    #[test]
    fn dut_tx_nothing_received() {
        let script = ScriptedConsole::new().on("dummy-tx", &["Link Up"]);
        let wire = MockWire::new(WireReply::Silent);
        assert_eq!(run(&script, &wire, dut_tx), Verdict::Fail);
        assert_eq!(wire.open_sockets(), 0);
    }

    #[test]
    fn dut_rx_checks_reported_header() {
        let script = ScriptedConsole::new().on(
            "loop-server -v",
            &[
                "Link Up",
                "D (2200) esp.emac: receive len= 64",
                "Received frame #0:",
                PC_DUMP,
                "Link Down",
            ],
        );
        let wire = MockWire::new(WireReply::Silent);
        assert_eq!(run(&script, &wire, dut_rx), Verdict::Pass);
        assert_eq!(script.written(), ["loop-server -v -f 0x3300 -t 2000"]);

        let sent = wire.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload().len(), 50);
        assert_eq!(wire.open_sockets(), 0);
    }

    #[test]
    fn dut_rx_wrong_source_fails() {
        let dump = PC_DUMP.replace("5e 10 00 01", "5e 10 00 09");
        let script = ScriptedConsole::new().on(
            "loop-server -v",
            &["Link Up", "esp.emac: receive len= 64", dump.as_str()],
        );
        let wire = MockWire::new(WireReply::Silent);
        assert_eq!(run(&script, &wire, dut_rx), Verdict::Fail);
    }

    #[test]
    fn dut_rx_wrong_length_fails() {
        let script = ScriptedConsole::new().on(
            "loop-server -v",
            &["Link Up", "esp.emac: receive len= 60", PC_DUMP],
        );
        let wire = MockWire::new(WireReply::Silent);
        assert_eq!(run(&script, &wire, dut_rx), Verdict::Fail);
    }

    #[test]
    fn dut_rx_longer_reported_length_fails() {
        let script = ScriptedConsole::new().on(
            "loop-server -v",
            &["Link Up", "D (2200) esp.emac: receive len= 640", PC_DUMP, "Link Down"],
        );
        let wire = MockWire::new(WireReply::Silent);
        assert_eq!(run(&script, &wire, dut_rx), Verdict::Fail);
    }

    #[test]
    fn dut_rx_skips_other_frames_before_the_expected_one() {
        let script = ScriptedConsole::new().on(
            "loop-server -v",
            &[
                "Link Up",
                "D (2190) esp.emac: receive len= 342",
                "D (2200) esp.emac: receive len= 64",
                PC_DUMP,
            ],
        );
        let wire = MockWire::new(WireReply::Silent);
        assert_eq!(run(&script, &wire, dut_rx), Verdict::Pass);
    }

    #[test]
    fn dut_rx_wrong_ethertype_fails() {
        let dump = PC_DUMP.replace("5e 10 00 01 33 00", "5e 10 00 01 08 00");
        let script = ScriptedConsole::new().on(
            "loop-server -v",
            &["Link Up", "esp.emac: receive len= 64", dump.as_str()],
        );
        let wire = MockWire::new(WireReply::Silent);
        assert_eq!(run(&script, &wire, dut_rx), Verdict::Fail);
    }

    #[test]
    fn dut_rx_wrong_destination_fails() {
        let dump = PC_DUMP.replace("ff ff ff ff ff ff 02", "ff ff ff ff ff fe 02");
        let script = ScriptedConsole::new().on(
            "loop-server -v",
            &["Link Up", "esp.emac: receive len= 64", dump.as_str()],
        );
        let wire = MockWire::new(WireReply::Silent);
        assert_eq!(run(&script, &wire, dut_rx), Verdict::Fail);
    }

    #[test]
    fn parses_receive_len_as_a_whole_number() {
        assert_eq!(parse_receive_len("D (2200) esp.emac: receive len= 64"), Some(64));
        assert_eq!(parse_receive_len("esp.emac: receive len= 640"), Some(640));
        assert_eq!(parse_receive_len("esp.emac: receive len=64, crc ok"), Some(64));
        assert_eq!(parse_receive_len("esp.emac: receive len= "), None);
        assert_eq!(parse_receive_len("Link Up"), None);
    }

    #[test]
    fn parses_hexdump_row() {
        let (dst, src, ty) = parse_header_dump(PC_DUMP).unwrap();
        assert_eq!(dst, MacAddr::BROADCAST);
        assert_eq!(src, MockWire::PC_MAC);
        assert_eq!(ty, 0x3300);

        assert!(parse_header_dump("ff ff ff ff ff ff 02 00 5e 10 00 01 33 00").is_none());
        assert!(parse_header_dump("Link Up").is_none());
    }

    #[test]
    fn empty_marker_always_matches() {
        assert!(contains(b"abc", b""));
        assert!(contains(b"xxESP32 HELLO", b"ESP32 HELLO"));
        assert!(!contains(b"ESP32", b"ESP32 HELLO"));
    }
}
