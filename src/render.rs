//! Operator report: verdict lines and the PC <-> PHY <-> DUT drawing.

use std::fmt::Write as _;
use std::io::IsTerminal;

use crate::advice::Advice;
use crate::isolate::{Diagnosis, Isolation, LegState, Legs, loopback_legs, path_legs};
use crate::probe::{ProbeKind, Verdict};
use crate::session::SessionReport;

const NORM: &str = "\x1b[0m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const ITALICS: &str = "\x1b[3m";

const DOTS: &str = ". . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . . .";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    Ansi,
    /// No escape codes: faulty legs are drawn with `x`, degraded ones with `?`.
    Plain,
}

impl Palette {
    /// Colour only when asked for and stdout is a terminal.
    pub fn for_stdout(no_color: bool) -> Self {
        if !no_color && std::io::stdout().is_terminal() {
            Palette::Ansi
        } else {
            Palette::Plain
        }
    }

    fn paint(self, text: &str, state: LegState) -> String {
        match self {
            Palette::Ansi => {
                let colour = match state {
                    LegState::Ok => GREEN,
                    LegState::Fault => RED,
                    LegState::Degraded => YELLOW,
                };
                format!("{colour}{text}{NORM}")
            }
            Palette::Plain => {
                let mark = match state {
                    LegState::Ok => return text.to_string(),
                    LegState::Fault => 'x',
                    LegState::Degraded => '?',
                };
                text.chars()
                    .map(|c| if matches!(c, '-' | '=' | '|') { mark } else { c })
                    .collect()
            }
        }
    }

    fn tint(self, text: &str, colour: &str) -> String {
        match self {
            Palette::Ansi => format!("{colour}{text}{NORM}"),
            Palette::Plain => text.to_string(),
        }
    }

    fn verdict(self, v: Verdict) -> String {
        let colour = match v {
            Verdict::Pass => GREEN,
            Verdict::Fail => RED,
            Verdict::NotSupported => YELLOW,
        };
        self.tint(&v.to_string(), colour)
    }
}

/// One drawing of the test setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub legs: Legs,
    /// Draw the near-end and far-end loops inside the PHY.
    pub phy_loop: bool,
    /// Draw the loop inside the MCU (loopback server).
    pub mac_loop: bool,
}

impl Topology {
    pub fn full_path(legs: Legs) -> Self {
        Self {
            legs,
            phy_loop: false,
            mac_loop: true,
        }
    }

    pub fn paths(legs: Legs) -> Self {
        Self {
            legs,
            phy_loop: false,
            mac_loop: false,
        }
    }

    pub fn phy_loops(legs: Legs) -> Self {
        Self {
            legs,
            phy_loop: true,
            mac_loop: false,
        }
    }

    pub fn draw(&self, palette: Palette) -> String {
        let Legs {
            near_tx,
            near_rx,
            far_tx,
            far_rx,
        } = self.legs;
        let p = |text: &str, state| palette.paint(text, state);

        let (
            near_rx_seg,
            near_tx_seg,
            near_loop,
            far_rx_seg,
            far_tx_seg,
            far_loop,
            phy_rx,
            phy_tx,
        ) = if self.phy_loop {
            (
                p("-<-.", near_rx),
                p("->-'", near_tx),
                p("|", near_tx),
                p(".-<-", far_rx),
                p("'->-", far_tx),
                p("|", far_tx),
                "       ".to_string(),
                "       ".to_string(),
            )
        } else {
            (
                p("----", near_rx),
                p("----", near_tx),
                " ".to_string(),
                p("<---", far_rx),
                p(">---", far_tx),
                " ".to_string(),
                p("-------", far_rx),
                p("-------", far_tx),
            )
        };

        let (mcu_rx, mcu_tx, mcu_loop) = if self.mac_loop {
            (p(".-<-", near_rx), p("'->-", near_tx), p("|", near_tx))
        } else {
            ("    ".to_string(), "    ".to_string(), " ".to_string())
        };

        let rmii_rx = p("-----Rx-----", near_rx);
        let rmii_tx = p("-----Tx-----", near_tx);
        let cable_rx = (p("-------", far_rx), p("------", far_rx));
        let cable_tx = (p("-------", far_tx), p("------", far_tx));
        let pc_conn = if far_tx == far_rx {
            p("===========", far_rx)
        } else {
            "===========".to_string()
        };

        let mut s = String::new();
        let _ = writeln!(s, "{DOTS}");
        let _ = writeln!(s, ". DUT                                                                                   .");
        let _ = writeln!(s, ".                          RMII                             Tr.                         .");
        let _ = writeln!(s, ".  +------------------+            +---------------+                  +-----------+     .     +---------------+");
        let _ = writeln!(s, ".  |              +---|            |               |        8|8       |           |     .     |               |");
        let _ = writeln!(
            s,
            ".  |          {mcu_rx}| M |{rmii_rx}|{near_rx_seg}{phy_rx}{far_rx_seg}|{} 8|8 {}|           |     .     |               |",
            cable_rx.0, cable_rx.1
        );
        let _ = writeln!(
            s,
            ".  |    MCU   {mcu_loop}   | A |            |   {near_loop}  PHY  {far_loop}   |                  |    RJ45   |{pc_conn}|    Test PC    |"
        );
        let _ = writeln!(
            s,
            ".  |          {mcu_tx}| C |{rmii_tx}|{near_tx_seg}{phy_tx}{far_tx_seg}|{} 8|8 {}|           |     .     |               |",
            cable_tx.0, cable_tx.1
        );
        let _ = writeln!(s, ".  |              +---|            |               |        8|8       |           |     .     |               |");
        let _ = writeln!(s, ".  +------------------+            +---------------+                  +-----------+     .     +---------------+");
        let _ = writeln!(s, ".                                                                                       .");
        if self.phy_loop {
            let label = palette.tint("(near-end loopback)         (far-end loopback)", ITALICS);
            let _ = writeln!(s, ".                    {label}                     .");
        }
        let _ = writeln!(s, "{DOTS}");
        s
    }
}

fn verdict_line(out: &mut String, report: &SessionReport, probe: ProbeKind, palette: Palette) {
    if let Some(v) = report.matrix.get(probe) {
        let _ = writeln!(out, "{}: {}", probe.label(), palette.verdict(v));
    }
}

fn diagnosis_advice(d: &Diagnosis) -> Vec<Advice> {
    let mut out = Vec::new();
    if !d.any_attributed() {
        return out;
    }
    if d.rmii_rx_fail || d.rmii_tx_fail {
        out.push(Advice::RmiiDataPath {
            rx: d.rmii_rx_fail,
            tx: d.rmii_tx_fail,
        });
    }
    if d.rj45_rx_fail || d.rj45_tx_fail {
        out.push(Advice::Rj45Path);
    }
    out
}

/// The whole report, in the order the stages ran.
pub fn report(report: &SessionReport, palette: Palette) -> String {
    let m = &report.matrix;
    let mut out = String::new();

    if let Some(v) = m.get(ProbeKind::LoopbackServer) {
        let state = if v == Verdict::Pass { LegState::Ok } else { LegState::Fault };
        out.push_str("\n\n");
        verdict_line(&mut out, report, ProbeKind::LoopbackServer, palette);
        out.push_str(&Topology::full_path(Legs::all(state)).draw(palette));
    }

    if m.get(ProbeKind::DutTx).is_some() || m.get(ProbeKind::DutRx).is_some() {
        out.push_str("\n\n");
        verdict_line(&mut out, report, ProbeKind::DutTx, palette);
        verdict_line(&mut out, report, ProbeKind::DutRx, palette);
        out.push_str(&Topology::paths(path_legs(m)).draw(palette));
    }

    if m.get(ProbeKind::NearEndLoopback).is_some() || m.get(ProbeKind::FarEndLoopback).is_some() {
        out.push_str("\n\n");
        verdict_line(&mut out, report, ProbeKind::NearEndLoopback, palette);
        verdict_line(&mut out, report, ProbeKind::FarEndLoopback, palette);
        out.push_str(&Topology::phy_loops(loopback_legs(m)).draw(palette));
    }

    let mut advice = report.advice.clone();
    match &report.isolation {
        Isolation::NoFault => {
            out.push('\n');
            out.push_str(&palette.tint(
                "No fault detected: the PC <-> PHY <-> DUT path is healthy.",
                GREEN,
            ));
            out.push('\n');
        }
        Isolation::Diagnosed(d) => {
            out.push_str("\n\n==============================\n");
            out.push_str("Final problem isolation\n");
            out.push_str("==============================\n");
            out.push_str(&d.topology().draw(palette));
            if d.tx_undetermined {
                let _ = writeln!(out, "transmit path failed, location undetermined");
            }
            if d.rx_undetermined {
                let _ = writeln!(out, "receive path failed, location undetermined");
            }
            for a in diagnosis_advice(d) {
                if !advice.contains(&a) {
                    advice.push(a);
                }
            }
        }
    }

    for a in &advice {
        out.push('\n');
        out.push_str(&palette.tint(&a.to_string(), YELLOW));
        out.push('\n');
    }

    if matches!(report.isolation, Isolation::Diagnosed(_)) {
        out.push('\n');
        out.push_str(&palette.tint(
            "The test finished! `Final problem isolation` shows the most probable location of the issue. \
             Go over the full log to see additional details of each tested scenario.",
            CYAN,
        ));
        out.push('\n');
    }
    out
}
