//! Telemetry Sources
//!
//! Where raw lines come from: a live link to the vehicle or a recorded file.
//! Both sit behind [`TelemetrySource`], which offers the same
//! `open` / `read_next` / `close` lifecycle for either.

mod error;
mod live;
mod recorded;
pub mod serial;
pub mod stream;

pub use error::SourceError;
pub use live::{LiveSource, SourceShutdown, POLL_INTERVAL};
pub use recorded::RecordedSource;
pub use serial::{list_ports, PortInfo};
pub use stream::ByteStream;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{SerialConfig, TelemetryConfig};

/// Which source a session should acquire from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// The serial link described by the given settings
    Serial(SerialConfig),
    /// The configured serial link ([`TelemetryConfig::serial`])
    ConfiguredSerial,
    /// A TCP endpoint, e.g. a serial-to-network bridge
    Tcp { address: String },
    /// A recorded file, read as fast as it can be parsed
    File(PathBuf),
}

/// A line source, live or recorded
pub enum TelemetrySource {
    Live(LiveSource),
    Recorded(RecordedSource),
}

impl TelemetrySource {
    /// Build (but do not open) the source selected by `source`
    pub fn from_config(source: &SourceConfig, config: &TelemetryConfig) -> Self {
        match source {
            SourceConfig::Serial(serial) => TelemetrySource::Live(LiveSource::serial(serial.clone())),
            SourceConfig::ConfiguredSerial => {
                TelemetrySource::Live(LiveSource::serial(config.serial.clone()))
            }
            SourceConfig::Tcp { address } => TelemetrySource::Live(LiveSource::tcp(
                address.clone(),
                Duration::from_millis(config.serial.read_timeout_ms),
            )),
            SourceConfig::File(path) => TelemetrySource::Recorded(RecordedSource::new(path)),
        }
    }

    pub fn open(&mut self) -> Result<(), SourceError> {
        match self {
            TelemetrySource::Live(source) => source.open(),
            TelemetrySource::Recorded(source) => source.open(),
        }
    }

    /// Next raw line; `Ok(None)` is a clean end of stream
    pub fn read_next(&mut self) -> Result<Option<String>, SourceError> {
        match self {
            TelemetrySource::Live(source) => source.read_next(),
            TelemetrySource::Recorded(source) => source.read_next(),
        }
    }

    pub fn close(&mut self) {
        match self {
            TelemetrySource::Live(source) => source.close(),
            TelemetrySource::Recorded(source) => source.close(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            TelemetrySource::Live(source) => source.is_open(),
            TelemetrySource::Recorded(source) => source.is_open(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, TelemetrySource::Live(_))
    }

    /// Lines delivered so far
    pub fn lines_read(&self) -> u64 {
        match self {
            TelemetrySource::Live(source) => source.lines_read(),
            TelemetrySource::Recorded(source) => source.lines_read(),
        }
    }

    /// Port, address or file the source reads from
    pub fn describe(&self) -> String {
        match self {
            TelemetrySource::Live(source) => source.target(),
            TelemetrySource::Recorded(source) => source.path().display().to_string(),
        }
    }

    /// Handle that interrupts a blocked live read; `None` for files, whose
    /// reads never block indefinitely
    pub fn shutdown_handle(&self) -> Option<SourceShutdown> {
        match self {
            TelemetrySource::Live(source) => Some(source.shutdown_handle()),
            TelemetrySource::Recorded(_) => None,
        }
    }
}

impl From<LiveSource> for TelemetrySource {
    fn from(source: LiveSource) -> Self {
        TelemetrySource::Live(source)
    }
}

impl From<RecordedSource> for TelemetrySource {
    fn from(source: RecordedSource) -> Self {
        TelemetrySource::Recorded(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_selects_variant() {
        let config = TelemetryConfig::default();
        let live = TelemetrySource::from_config(&SourceConfig::ConfiguredSerial, &config);
        assert!(live.is_live());
        assert!(live.shutdown_handle().is_some());

        let file = TelemetrySource::from_config(&SourceConfig::File("run.csv".into()), &config);
        assert!(!file.is_live());
        assert_eq!(file.describe(), "run.csv");
    }

    #[test]
    fn test_open_failure_leaves_source_closed() {
        let config = TelemetryConfig::default();
        let mut source = TelemetrySource::from_config(
            &SourceConfig::File("/nonexistent/racelog.csv".into()),
            &config,
        );
        assert!(matches!(source.open(), Err(SourceError::Open { .. })));
        assert!(!source.is_open());
        source.close();
    }
}
