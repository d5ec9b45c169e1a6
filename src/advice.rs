//! Remediation hints shown to the operator next to the diagnosis.

use std::fmt;

const RULE: &str = "=================================================================================";

/// A remediation hint. Probes record these; the report prints each once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    EthInitFailed,
    LinkUpFailed,
    RmiiDataPath { rx: bool, tx: bool },
    Rj45Path,
}

impl fmt::Display for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Advice::EthInitFailed => f.write_str(ETH_INIT_FAILED),
            Advice::LinkUpFailed => f.write_str(LINK_UP_FAILED),
            Advice::RmiiDataPath { rx, tx } => f.write_str(&rmii_failure(rx, tx)),
            Advice::Rj45Path => f.write_str(RJ45_FAILED),
        }
    }
}

const ETH_INIT_FAILED: &str = "\
=================================================================================
Ethernet initialization failed!
------------------------------
Check the DUT log above and investigate possible root causes:
1) If EMAC errors:
   a) RMII REF CLK mode incorrectly configured if EMAC initialization times out.
        Does the MCU output the RMII CLK? Or is RMII CLK provided externally by the PHY or an oscillator?
   b) If external RMII CLK is used, measure the clock at the MCU REF RMII CLK input pin using an
      oscilloscope with sufficient bandwidth. There must be a 50 MHz square wave.
   c) Make sure the programmer/monitor correctly handles nDTR/nRST and the associated transistors
      connected to the boot strapping pin.
2) If PHY errors:
   a) Check the bootstrap (PHY address) is set correctly, or set to \"auto\" in the firmware config.
   b) Cross-check with schematics that MDIO and MDC GPIOs are correctly configured.
=================================================================================";

const LINK_UP_FAILED: &str = "\
=================================================================================
Link failed to come up!
-----------------------
Possible root causes:
1) DUT not connected. Check the Ethernet cable from the test PC is properly connected to the DUT.
2) PHY is not able to negotiate a link:
   a) incorrect configuration of the test PC NIC
   b) HW problem in the DUT on the path between the PHY and RJ45
=================================================================================";

const RJ45_FAILED: &str = "\
=================================================================================
Path between PHY and RJ45 non functional!
-----------------------------------------
* Double check the design checklist: correct components and a correct design.
* Check the trace is not corrupted.
* Check the components are correctly soldered and the correct part numbers are mounted.
=================================================================================";

fn rmii_failure(rx: bool, tx: bool) -> String {
    let both = rx && tx;
    let and = if both { " and " } else { "" };
    let receive = if rx { "receive" } else { "" };
    let transmit = if tx { "transmit" } else { "" };
    let rx_pins = if rx { "RXD[0,1]" } else { "" };
    let tx_pins = if tx { "TXD[0,1]" } else { "" };

    let mut s = String::new();
    s.push_str(RULE);
    s.push_str("\nThe RMII data plane is non functional!\n");
    s.push_str("--------------------------------------\n");
    s.push_str(&format!(
        "The DUT is not able to {receive}{and}{transmit} Ethernet frames. The issue needs to be probed on the board.\n"
    ));
    s.push_str(&format!(
        "* Identify the location of the {rx_pins}{and}{tx_pins} pins on your board at the MCU side and at the PHY side.\n"
    ));
    s.push_str(
        "* Go over all identified pins. Connect the first oscilloscope probe at the MCU pin and the other \
         probe at the PHY side (expect a 25 MHz signal in 100 Mbps mode).\n",
    );
    if tx {
        s.push_str("\n-- Transmit path steps: --\n");
        s.push_str("  * Run the `dummy-tx` command in the DUT console. Configure interval and count so there is enough time to measure.\n");
        s.push_str(
            "  * The DUT now transmits frames and the same signal must be visible at both the MCU and PHY sides. \
             If it is missing at the PHY side, the trace is broken: a missing or wrong series termination \
             resistor, or incorrect routing.\n",
        );
        s.push_str(&format!("  * If the signal at {tx_pins} is OK, check the TX_EN signal path.\n"));
    }
    if rx {
        s.push_str("\n-- Receive path steps: --\n");
        s.push_str("  * Run `eth-phy-probe --eth-nic NIC_NAME dummy-tx` on the test PC. Configure interval and count so there is enough time to measure.\n");
        s.push_str(
            "  * The test PC now transmits frames and the same signal must be visible at both the PHY and MCU sides. \
             If it is missing at the MCU side, the trace is broken: a missing or wrong series termination \
             resistor, or incorrect routing.\n",
        );
    }
    if both {
        s.push_str("Since neither receive nor transmit works, also check the CRS_DV signal path if the data signals look good.\n");
    }
    s.push_str(RULE);
    s
}

/// Shown when the process may not open raw sockets.
pub fn raw_socket_permission(executable: &str) -> String {
    format!(
        "{RULE}\n\
         Insufficient permission to create raw socket\n\
         Either run as root or grant the capability to this executable:\n  \
         sudo setcap 'CAP_NET_RAW+eip' {executable}\n\
         {RULE}"
    )
}
