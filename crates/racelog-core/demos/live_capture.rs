//! Live capture tool
//!
//! Acquires telemetry, records it to the log directory and prints running
//! statistics. Without a port it captures from the built-in simulator.
//!
//! Usage:
//!   cargo run --example live_capture -- [OPTIONS] [PORT]
//!
//! Options:
//!   --baud RATE       Baud rate (default: 115200)
//!   --seconds N       Capture duration (default: 10)
//!   --log-dir DIR     Log directory (default: data_logs)
//!   --validate        Drop physically implausible readings
//!   --list            List serial ports and exit

use anyhow::{bail, Context};
use racelog_core::prelude::*;
use racelog_core::source::{list_ports, LiveSource};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = TelemetryConfig::default();
    let mut seconds = 10u64;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--baud" => {
                i += 1;
                config.serial.baud_rate = args.get(i).context("--baud needs a value")?.parse()?;
            }
            "--seconds" => {
                i += 1;
                seconds = args.get(i).context("--seconds needs a value")?.parse()?;
            }
            "--log-dir" => {
                i += 1;
                config.log.directory = args.get(i).context("--log-dir needs a value")?.into();
            }
            "--validate" => config.validation = ValidationPolicy::Reject,
            "--list" => {
                for port in list_ports() {
                    println!("{}  {}", port.name, port.product.unwrap_or_default());
                }
                return Ok(());
            }
            arg if arg.starts_with("--") => bail!("unknown option {arg}"),
            port => config.serial.port_name = port.to_string(),
        }
        i += 1;
    }

    let telemetry = Telemetry::new(config)?;
    let log = telemetry.begin_recording_in_log_dir()?;
    println!("Recording to {}", telemetry.recording_path().unwrap_or_default().display());

    let session = if telemetry.config().serial.port_name.is_empty() {
        println!("No port given, capturing from the simulator");
        let stream = DemoSimulator::random().into_stream(&telemetry.config().wire, true);
        let source = LiveSource::from_stream(Box::new(stream), Duration::from_secs(1));
        telemetry.start_session_with(source.into())?
    } else {
        telemetry.start_session(&SourceConfig::ConfiguredSerial)?
    };

    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(seconds) && telemetry.session_running(session)? {
        std::thread::sleep(Duration::from_secs(1));
        let stats = telemetry.statistics();
        let speed = stats.field(Field::Speed);
        let rpm = stats.field(Field::Rpm);
        println!(
            "{:>6} readings | speed max {:>6.1} mean {:>6.1} | rpm max {:>5.0} | rejected {}",
            stats.count(),
            speed.max().unwrap_or(0.0),
            speed.mean().unwrap_or(0.0),
            rpm.max().unwrap_or(0.0),
            telemetry.rejected_lines(),
        );
    }

    let counters = telemetry.session_counters(session)?;
    let end = telemetry.stop_session(session)?;
    let path = telemetry.end_recording(log)?;
    println!("Session ended: {end:?}");
    println!("{counters:#?}");
    println!("Saved {}", path.display());
    Ok(())
}
