//! Maps a session's verdicts to the segment most likely at fault.

use crate::probe::{ProbeKind, Verdict, VerdictMatrix};
use crate::render::Topology;

/// How one leg of the topology is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegState {
    Ok,
    Fault,
    /// Not supported, or not determined.
    Degraded,
}

impl LegState {
    fn of_loopback(v: Option<Verdict>) -> Self {
        match v {
            Some(Verdict::Pass) => LegState::Ok,
            Some(Verdict::Fail) => LegState::Fault,
            Some(Verdict::NotSupported) | None => LegState::Degraded,
        }
    }

    fn of_path(v: Option<Verdict>) -> Self {
        if v == Some(Verdict::Pass) {
            LegState::Ok
        } else {
            LegState::Fault
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Legs {
    pub near_tx: LegState,
    pub near_rx: LegState,
    pub far_tx: LegState,
    pub far_rx: LegState,
}

impl Legs {
    pub fn all(state: LegState) -> Self {
        Self {
            near_tx: state,
            near_rx: state,
            far_tx: state,
            far_rx: state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnosis {
    pub rmii_rx_fail: bool,
    pub rmii_tx_fail: bool,
    pub rj45_rx_fail: bool,
    pub rj45_tx_fail: bool,
    /// The direction failed end to end but no loopback pins it to a segment.
    pub rx_undetermined: bool,
    pub tx_undetermined: bool,
    pub legs: Legs,
}

impl Diagnosis {
    pub fn any_attributed(&self) -> bool {
        self.rmii_rx_fail || self.rmii_tx_fail || self.rj45_rx_fail || self.rj45_tx_fail
    }

    pub fn topology(&self) -> Topology {
        Topology::phy_loops(self.legs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// `loopback_server` passed; nothing to isolate.
    NoFault,
    Diagnosed(Diagnosis),
}

/// Segment flags for one loopback: `(rx, tx, rx_leg, tx_leg)`.
fn segment(
    loopback: LegState,
    rx_failed: bool,
    tx_failed: bool,
) -> (bool, bool, LegState, LegState) {
    match loopback {
        LegState::Ok => (false, false, LegState::Ok, LegState::Ok),
        LegState::Degraded => (false, false, LegState::Degraded, LegState::Degraded),
        LegState::Fault => {
            let leg = |failed: bool| if failed { LegState::Fault } else { LegState::Ok };
            (rx_failed, tx_failed, leg(rx_failed), leg(tx_failed))
        }
    }
}

/// A directional fault is only attributed to a segment whose own loopback
/// failed outright; a not-supported loopback never attributes anything.
pub fn isolate(m: &VerdictMatrix) -> Isolation {
    if m.is(ProbeKind::LoopbackServer, Verdict::Pass) {
        return Isolation::NoFault;
    }

    let tx_failed = m.is(ProbeKind::DutTx, Verdict::Fail);
    let rx_failed = m.is(ProbeKind::DutRx, Verdict::Fail);
    let near = LegState::of_loopback(m.get(ProbeKind::NearEndLoopback));
    let far = LegState::of_loopback(m.get(ProbeKind::FarEndLoopback));

    let (rmii_rx_fail, rmii_tx_fail, near_rx, near_tx) = segment(near, rx_failed, tx_failed);
    let (rj45_rx_fail, rj45_tx_fail, far_rx, far_tx) = segment(far, rx_failed, tx_failed);

    Isolation::Diagnosed(Diagnosis {
        rmii_rx_fail,
        rmii_tx_fail,
        rj45_rx_fail,
        rj45_tx_fail,
        rx_undetermined: rx_failed && !rmii_rx_fail && !rj45_rx_fail,
        tx_undetermined: tx_failed && !rmii_tx_fail && !rj45_tx_fail,
        legs: Legs {
            near_tx,
            near_rx,
            far_tx,
            far_rx,
        },
    })
}

/// Legs as the direction probes alone see them: each direction spans the
/// whole path.
pub fn path_legs(m: &VerdictMatrix) -> Legs {
    let tx = LegState::of_path(m.get(ProbeKind::DutTx));
    let rx = LegState::of_path(m.get(ProbeKind::DutRx));
    Legs {
        near_tx: tx,
        near_rx: rx,
        far_tx: tx,
        far_rx: rx,
    }
}

/// Legs as the two PHY loopbacks see them.
pub fn loopback_legs(m: &VerdictMatrix) -> Legs {
    let near = LegState::of_path(m.get(ProbeKind::NearEndLoopback));
    let far = LegState::of_loopback(m.get(ProbeKind::FarEndLoopback));
    Legs {
        near_tx: near,
        near_rx: near,
        far_tx: far,
        far_rx: far,
    }
}
