//! Loopback probes: full path through the DUT, and the two PHY loopbacks.

use tracing::{error, info, warn};

use crate::advice::Advice;
use crate::frame::counting_payload;

use super::{ProbeContext, ProbeKind, SessionError, Verdict, transport_outcome};

const FAR_END_UNSUPPORTED: &str = "far-end loopback is not supported by selected PHY";
const LOOPED_FRAMES: &str = "looped frames: ";

/// PC -> PHY -> DUT MAC -> PHY -> PC, with the DUT echoing every frame.
pub fn loopback_server(ctx: &mut ProbeContext<'_>) -> Result<Verdict, SessionError> {
    let probe = ProbeKind::LoopbackServer;
    let cmd = format!(
        "loop-server -f {:#x} -t {}",
        ctx.settings.ethertype, ctx.settings.loop_server_window_ms
    );
    ctx.send(&cmd)?;
    if !ctx.wait_link_up(probe)? {
        return Ok(Verdict::Fail);
    }

    let verdict = echo(ctx, probe)?;
    ctx.settle_link_down(probe)?;
    Ok(verdict)
}

/// PC -> PHY -> PC with the PHY reflecting the line side.
pub fn far_end_loopback(ctx: &mut ProbeContext<'_>) -> Result<Verdict, SessionError> {
    let probe = ProbeKind::FarEndLoopback;
    ctx.send("farend-loop-en -e")?;

    if ctx.expect(super::LINK_UP, ctx.settings.link_up_timeout)?.is_none() {
        let grace = ctx.settings.far_end_unsupported_grace;
        let unsupported = ctx.expect(FAR_END_UNSUPPORTED, grace)?.is_some();
        ctx.send("farend-loop-en -d")?;
        if unsupported {
            warn!(%probe, "DUT PHY does not support far-end loopback");
            return Ok(Verdict::NotSupported);
        }
        error!(%probe, timeout = ?ctx.settings.link_up_timeout, "link failed to come up");
        ctx.advise(Advice::LinkUpFailed);
        return Ok(Verdict::Fail);
    }

    let verdict = match echo(ctx, probe) {
        Ok(verdict) => verdict,
        Err(e) => {
            // keep the original error; the disable is best effort here
            if let Err(disable) = ctx.send("farend-loop-en -d") {
                warn!(%probe, error = %disable, "could not disable far-end loopback");
            }
            return Err(e);
        }
    };
    ctx.send("farend-loop-en -d")?;
    ctx.settle_link_down(probe)?;
    Ok(verdict)
}

/// DUT-internal loopback; the DUT counts what came back itself.
pub fn near_end_loopback(ctx: &mut ProbeContext<'_>) -> Result<Verdict, SessionError> {
    let probe = ProbeKind::NearEndLoopback;
    let frames = ctx.settings.near_end_frames;
    ctx.send(&format!(
        "loop-test -s {} -c {}",
        ctx.settings.near_end_frame_len, frames
    ))?;
    if !ctx.wait_link_up(probe)? {
        return Ok(Verdict::Fail);
    }

    let result = ctx.expect_with(
        LOOPED_FRAMES,
        ctx.settings.near_end_result_timeout,
        parse_loop_result,
    )?;
    let verdict = match result {
        Some((looped, 0)) if looped == frames => Verdict::Pass,
        Some((looped, rx_errors)) => {
            error!(%probe, expected = frames, looped, rx_errors, "near-end loopback lost frames");
            Verdict::Fail
        }
        None => {
            error!(%probe, "DUT reported no loopback result");
            Verdict::Fail
        }
    };
    ctx.settle_link_down(probe)?;
    Ok(verdict)
}

fn echo(ctx: &mut ProbeContext<'_>, probe: ProbeKind) -> Result<Verdict, SessionError> {
    let payload = counting_payload(ctx.settings.echo_payload_len);
    let matched = transport_outcome(
        probe,
        ctx.transport
            .send_and_expect_echo(ctx.settings.target, &payload, ctx.settings.echo_timeout),
    )?;
    let verdict = if matched == Some(true) {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    info!(%probe, %verdict, len = payload.len(), "echo test");
    Ok(verdict)
}

/// `looped frames: 5, rx errors: 0` -> `(5, 0)`.
fn parse_loop_result(line: &str) -> Option<(u32, u32)> {
    let rest = &line[line.find(LOOPED_FRAMES)? + LOOPED_FRAMES.len()..];
    let (looped, rest) = rest.split_once(',')?;
    let errors = rest.trim().strip_prefix("rx errors:")?.trim();
    Some((looped.trim().parse().ok()?, errors.parse().ok()?))
}
