//! Replay a log file
//!
//! Loads a recorded log and replays it with its original timing, printing
//! each reading as the cursor reaches it.
//!
//! Usage:
//!   cargo run --example replay_file -- <LOG_FILE> [--speed X] [--from MS]

use anyhow::{bail, Context};
use racelog_core::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut path = None;
    let mut speed = 1.0f64;
    let mut from_ms = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--speed" => {
                i += 1;
                speed = args.get(i).context("--speed needs a value")?.parse()?;
            }
            "--from" => {
                i += 1;
                from_ms = Some(args.get(i).context("--from needs a value")?.parse::<u64>()?);
            }
            arg if arg.starts_with("--") => bail!("unknown option {arg}"),
            file => path = Some(file.to_string()),
        }
        i += 1;
    }
    let Some(path) = path else {
        bail!("Usage: replay_file <LOG_FILE> [--speed X] [--from MS]");
    };

    let telemetry = Telemetry::new(TelemetryConfig::default())?;
    let handle = telemetry
        .load_recording(&path)
        .with_context(|| format!("loading {path}"))?;
    let recording = telemetry.recording(handle)?;
    println!(
        "{} readings over {:.1}s ({} malformed lines skipped)",
        recording.len(),
        recording.duration_ms() as f64 / 1000.0,
        recording.rejected_lines()
    );

    if let Some(ms) = from_ms {
        telemetry.seek_to_time(handle, ms)?;
    }

    let mut cursor = telemetry.subscribe_cursor();
    telemetry.play(handle, speed)?;
    loop {
        let update = *cursor.borrow_and_update();
        if let Some(reading) = update.index.and_then(|i| recording.get(i)) {
            println!("[{:>5}] {}", update.index.unwrap_or(0), reading);
        }
        if update.state != ReplayState::Playing {
            break;
        }
        cursor.changed().await?;
    }

    let stats = telemetry.statistics();
    println!(
        "Replayed {} readings, top speed {:.1}",
        stats.count(),
        stats.field(Field::Speed).max().unwrap_or(0.0)
    );
    Ok(())
}
