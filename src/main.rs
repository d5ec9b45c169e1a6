use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use crossbeam_channel::bounded;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod advice;
mod cli;
mod console;
mod frame;
mod isolate;
mod mac;
mod net;
mod port;
mod probe;
mod render;
mod rx;
mod session;
mod stats;
#[cfg(test)]
mod testing;
mod traffic;

use advice::Advice;
use console::DutConsole;
use net::{FrameTransport, TransportError};
use probe::SessionError;

/// How long a cancelled generator may take to notice before we give up on it.
const STOP_GRACE: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    let args = cli::Cli::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let res = match &args.cmd {
        cli::Cmd::DummyTx(opts) => dummy_tx(&args.eth_nic, opts),
        cli::Cmd::Test(opts) => test(&args.eth_nic, opts),
        cli::Cmd::RxMonitor(opts) => rx_monitor(&args.eth_nic, opts),
    };
    match res {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

/// Print remediation for problems with the test PC itself.
fn environment_hint(e: &TransportError) {
    if matches!(e, TransportError::PermissionDenied) {
        let exe = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "eth-phy-probe".to_string());
        eprintln!("{}", advice::raw_socket_permission(&exe));
    }
}

fn open_transport(nic: &str, ethertype: u16) -> Result<FrameTransport> {
    let transport = FrameTransport::open(nic, ethertype).inspect_err(environment_hint)?;
    info!(interface = transport.interface(), "using interface for testing");
    Ok(transport)
}

fn dummy_tx(nic: &str, opts: &cli::DummyTxOpts) -> Result<ExitCode> {
    let config = opts.traffic_config()?;
    let transport = open_transport(nic, opts.ethertype)?;
    let handle = traffic::spawn(transport, config).context("spawn traffic generator")?;

    let (interrupt_tx, interrupt_rx) = bounded::<()>(1);
    let canceller = handle.canceller();
    ctrlc::set_handler(move || {
        canceller.cancel();
        let _ = interrupt_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    let result = loop {
        if handle.is_finished() {
            break handle.join();
        }
        if interrupt_rx.recv_timeout(Duration::from_millis(100)).is_ok() {
            match handle.stop(STOP_GRACE) {
                Ok(res) => break res,
                Err(_stuck) => {
                    warn!(grace = ?STOP_GRACE, "traffic generator did not stop, exiting anyway");
                    return Ok(ExitCode::from(2));
                }
            }
        }
    };

    let summary = result.inspect_err(environment_hint)?;
    info!(frames = summary.frames, bytes = summary.bytes, "done");
    Ok(ExitCode::SUCCESS)
}

fn rx_monitor(nic: &str, opts: &cli::RxMonitorOpts) -> Result<ExitCode> {
    let transport = open_transport(nic, opts.ethertype)?;
    let (cancel, signal) = traffic::cancel_pair();
    ctrlc::set_handler(move || cancel.cancel()).context("install Ctrl-C handler")?;

    let stats = rx::run(&transport, &opts.monitor_config(), &signal).inspect_err(environment_hint)?;
    println!(
        "received {} frames ({} bytes), lost {}, runt {}",
        stats.ok, stats.bytes, stats.lost, stats.runt
    );
    Ok(ExitCode::SUCCESS)
}

fn test(nic: &str, opts: &cli::TestOpts) -> Result<ExitCode> {
    let settings = opts.probe_settings();
    let transport = open_transport(nic, settings.ethertype)?;

    let mut port = port::open_port(&opts.ser)?;
    if opts.reset {
        port::pulse_reset(port.as_mut()).context("reset DUT")?;
    }
    let mut console = DutConsole::new(Box::new(port));

    let report = match session::run(&mut console, &transport, &settings, opts.session_options()) {
        Ok(report) => report,
        Err(SessionError::DutInit) => {
            println!("{}", Advice::EthInitFailed);
            return Err(anyhow!(SessionError::DutInit));
        }
        Err(SessionError::Environment(e)) => {
            environment_hint(&e);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    print!("{}", render::report(&report, render::Palette::for_stdout(opts.no_color)));
    if report.healthy() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
