//! Log file naming
//!
//! Generated names combine a microsecond-resolution local timestamp with a
//! process-wide sequence number, so two sessions started within the same
//! clock tick still get different names.

use chrono::{DateTime, TimeZone};
use std::sync::atomic::{AtomicU64, Ordering};

/// Extension of log files
pub const LOG_EXTENSION: &str = "csv";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Next value of the process-wide sequence
pub fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Build a log file name, e.g. `run_20240601_143005_123456_0007.csv`.
///
/// Deterministic in its inputs.
pub fn log_file_name<Tz>(prefix: &str, timestamp: &DateTime<Tz>, sequence: u64) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{}_{:04}.{}",
        prefix,
        timestamp.format("%Y%m%d_%H%M%S_%6f"),
        sequence,
        LOG_EXTENSION
    )
}
