use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{error, info};

use brainbit_rs::config::SessionConfig;
use brainbit_rs::device::Backend;
use brainbit_rs::protocol::CHANNEL_NAMES;
use brainbit_rs::session::{ConnectionContext, Session};
use brainbit_rs::sim::{DemoFeed, SimBackend, SIM_ADDRESS};
use brainbit_rs::types::SessionEvent;

/// Monitor a BrainBit headset from the terminal.
///
/// While streaming, type a command and press Enter: `c` restarts
/// calibration, `r` measures electrode resistance, `s` prints session
/// statistics, `q` quits.
#[derive(Parser, Debug)]
#[command(name = "brainbit-monitor", version)]
struct Cli {
    /// Headset address (MAC on Linux, UUID on macOS)
    #[arg(long)]
    address: Option<String>,

    /// Advertised name, used in messages only
    #[arg(long)]
    name: Option<String>,

    /// Run against the built-in simulated headset
    #[arg(long, conflicts_with_all = ["demo", "scan"])]
    simulate: bool,

    /// Synthetic metrics only, no device
    #[arg(long, conflicts_with = "scan")]
    demo: bool,

    /// List nearby BrainBit headsets and exit
    #[arg(long)]
    scan: bool,

    /// JSON session configuration
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=brainbit_rs=debug cargo run -- --simulate
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    if cli.demo {
        return run_demo(&config).await;
    }
    if cli.scan {
        return run_scan().await;
    }

    let mut address = cli.address;
    let name = cli.name;

    let backend: Box<dyn Backend> = if cli.simulate {
        address.get_or_insert_with(|| SIM_ADDRESS.to_owned());
        Box::new(SimBackend::new())
    } else {
        real_backend()?
    };

    // ── Connect ───────────────────────────────────────────────────────────────
    let mut ctx = ConnectionContext::new();
    info!("Connecting to BrainBit headset …");
    let (session, mut rx) = Session::connect(
        backend.as_ref(),
        &config,
        &mut ctx,
        address.as_deref(),
        name.as_deref(),
    )
    .await?;
    let session = Arc::new(session);

    info!("Streaming started. Type a command + Enter:");
    info!("  c  – restart calibration");
    info!("  r  – measure electrode resistance now");
    info!("  s  – print session statistics");
    info!("  q  – quit\n");

    // ── Stdin command loop ────────────────────────────────────────────────────
    // Lines are read on a dedicated OS thread so no StdinLock is held across
    // await points.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // ── Main event loop ───────────────────────────────────────────────────────
    loop {
        tokio::select! {
            line = line_rx.recv() => match line.as_deref() {
                Some("q") | None => {
                    info!("Quit requested.");
                    break;
                }
                Some("c") => {
                    if let Err(e) = session.start_calibration() {
                        error!("Calibration: {e}");
                    }
                }
                Some("r") => {
                    let s = Arc::clone(&session);
                    tokio::spawn(async move {
                        let outcome = s.measure_resistance_now().await;
                        info!("Resistance check: {outcome:?}");
                    });
                }
                Some("s") => println!("{:#?}", session.stats()),
                Some("") => {}
                Some(other) => println!("unknown command '{other}'"),
            },
            event = rx.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
        }
    }

    session.teardown().await;
    ctx.clear();
    info!("Session finished – exiting.");
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Status(s) => println!("[STATUS] {s}"),
        SessionEvent::Channels(c) => {
            let volts = c
                .sample
                .channels()
                .iter()
                .zip(CHANNEL_NAMES)
                .map(|(v, n)| format!("{n}={v:+.6} V"))
                .collect::<Vec<_>>()
                .join("  ");
            println!(
                "[EEG] pack={:6} #{:<6} {volts}  peak={:.6} V",
                c.sample.pack_num, c.batches, c.peak
            );
        }
        SessionEvent::Resistance(r) => println!("[RESIST] {r}"),
        SessionEvent::Artifacts(true) => println!("[SIGNAL] ⚠ artifacts detected"),
        SessionEvent::Artifacts(false) => {}
        SessionEvent::Metrics(m) => {
            let (a, b, t) = m.spectral_percents();
            println!(
                "[METRICS] alpha={a:5.1}%  beta={b:5.1}%  theta={t:5.1}%  \
                 attention={:5.1}%  relaxation={:5.1}%",
                m.attention * 100.0,
                m.relaxation * 100.0
            );
        }
        SessionEvent::Calibration(c) => println!("[CALIBRATION] {c:?}"),
        SessionEvent::Engagement(text) => println!("[ENGAGEMENT] {text}"),
        SessionEvent::Mode(m) => println!("[MODE] {m}"),
        SessionEvent::Warning(w) => println!("[WARN] {w}"),
        SessionEvent::Error(e) => println!("[ERROR] {e}"),
        SessionEvent::Disconnected => println!("[LINK] ❌ disconnected"),
    }
}

async fn run_demo(config: &SessionConfig) -> Result<()> {
    info!("Demo mode: synthetic metrics, Ctrl-C to quit.");
    let mut feed = DemoFeed::new(
        config.smoothing.demo_factor,
        config.smoothing.emit_interval(),
    );
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if let Some(m) = feed.tick(std::time::Instant::now()) {
                    print_event(&SessionEvent::Metrics(m));
                }
            }
        }
    }
    Ok(())
}

#[cfg(feature = "ble")]
fn real_backend() -> Result<Box<dyn Backend>> {
    Ok(Box::new(brainbit_rs::ble::BleBackend))
}

#[cfg(not(feature = "ble"))]
fn real_backend() -> Result<Box<dyn Backend>> {
    anyhow::bail!("built without Bluetooth support; use --simulate")
}

#[cfg(feature = "ble")]
async fn run_scan() -> Result<()> {
    use brainbit_rs::ble::BleScanner;
    use brainbit_rs::device::Scanner;
    use brainbit_rs::types::SensorFamily;

    let scanner = BleScanner::new(SensorFamily::BrainBit);
    let found = scanner.scan_for(Duration::from_secs(10)).await?;
    scanner.close();
    if found.is_empty() {
        println!("No BrainBit headsets found.");
    }
    for d in found {
        println!("{:<40} {} ({:?})", d.address, d.name, d.family);
    }
    Ok(())
}

#[cfg(not(feature = "ble"))]
async fn run_scan() -> Result<()> {
    anyhow::bail!("built without Bluetooth support")
}
