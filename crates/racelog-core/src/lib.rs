//! # RaceLog Core Library
//!
//! Vehicle telemetry acquisition, recording and replay.
//!
//! This library provides:
//! - A line protocol parser for the legacy (5 field) and extended (18 field)
//!   telemetry layouts
//! - Live sources over serial ports or TCP, and recorded sources over log files
//! - A thread-safe telemetry store with incrementally maintained statistics
//! - A recorder writing the same line protocol to uniquely named log files
//! - A replay scheduler reproducing the original timing at any speed
//!
//! ## Example
//!
//! ```rust,ignore
//! use racelog_core::prelude::*;
//!
//! let telemetry = Telemetry::new(TelemetryConfig::default())?;
//!
//! // Acquire from the configured serial port, logging to the log directory
//! let log = telemetry.begin_recording_in_log_dir()?;
//! let session = telemetry.start_session(&SourceConfig::ConfiguredSerial)?;
//! // ...
//! println!("{:?}", telemetry.statistics().field(Field::Speed).max());
//! telemetry.stop_session(session)?;
//! let path = telemetry.end_recording(log)?;
//!
//! // Replay it at double speed (inside a tokio runtime)
//! let recording = telemetry.load_recording(&path)?;
//! telemetry.play(recording, 2.0)?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod demo;
pub mod parser;
pub mod reading;
pub mod recorder;
pub mod replay;
pub mod session;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod validate;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        ConfigError, LogConfig, SerialConfig, StoreConfig, TelemetryConfig, ValidationPolicy,
        WireFormat,
    };
    pub use crate::demo::DemoSimulator;
    pub use crate::parser::{LineParser, ParseError, ParsedLine};
    pub use crate::reading::{Field, Layout, Reading};
    pub use crate::recorder::{RecordTarget, Recorder, RecorderError};
    pub use crate::replay::{CursorUpdate, Recording, ReplayError, ReplayScheduler, ReplayState};
    pub use crate::session::{
        AcquisitionSession, RecorderSlot, SessionCounters, SessionEnd, SessionEvent,
    };
    pub use crate::source::{
        LiveSource, RecordedSource, SourceConfig, SourceError, TelemetrySource,
    };
    pub use crate::store::{Aggregate, FieldStats, StoreEvent, TelemetryStore};
    pub use crate::telemetry::{
        RecorderHandle, RecordingHandle, SessionHandle, Telemetry, TelemetryError,
    };
    pub use crate::validate::{RangeValidator, ValidationError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
