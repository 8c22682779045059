//! Loaded recordings
//!
//! A [`Recording`] is the full, parsed content of one log file, ready to be
//! navigated or handed to the [`super::ReplayScheduler`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::WireFormat;
use crate::parser::LineParser;
use crate::reading::{Field, Reading};
use crate::source::{RecordedSource, SourceError};

/// An immutable, ordered sequence of readings loaded for replay
#[derive(Debug, Clone, Default)]
pub struct Recording {
    path: Option<PathBuf>,
    readings: Vec<Arc<Reading>>,
    rejected_lines: usize,
}

impl Recording {
    /// Recording over readings already in memory
    pub fn new<I>(readings: I) -> Self
    where
        I: IntoIterator<Item = Reading>,
    {
        Self {
            path: None,
            readings: readings.into_iter().map(Arc::new).collect(),
            rejected_lines: 0,
        }
    }

    /// Read and parse a log file.
    ///
    /// Malformed lines are skipped and counted; only failing to open or read
    /// the file is an error.
    pub fn load<P: AsRef<Path>>(path: P, format: &WireFormat) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let parser = LineParser::new(format);
        let mut source = RecordedSource::new(path);
        source.open()?;

        let mut readings = Vec::new();
        let mut rejected_lines = 0;
        let result = loop {
            match source.read_next() {
                Ok(Some(line)) => match parser.parse_reading(&line) {
                    Ok(Some(reading)) => readings.push(Arc::new(reading)),
                    Ok(None) => {}
                    Err(e) => {
                        rejected_lines += 1;
                        warn!(line = source.lines_read(), "skipping malformed line: {e}");
                    }
                },
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        source.close();
        result?;

        info!(
            path = %path.display(),
            readings = readings.len(),
            rejected = rejected_lines,
            "recording loaded"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            readings,
            rejected_lines,
        })
    }

    /// File the recording was loaded from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of readings
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Lines skipped while loading
    pub fn rejected_lines(&self) -> usize {
        self.rejected_lines
    }

    /// Time between the first and last reading
    pub fn duration_ms(&self) -> u64 {
        match (self.readings.first(), self.readings.last()) {
            (Some(first), Some(last)) => last.time_ms().saturating_sub(first.time_ms()),
            _ => 0,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Reading>> {
        self.readings.get(index)
    }

    /// All readings, in order
    pub fn readings(&self) -> &[Arc<Reading>] {
        &self.readings
    }

    /// Clamp an index into the valid range; `None` if the recording is empty
    pub fn clamp_index(&self, index: usize) -> Option<usize> {
        (!self.readings.is_empty()).then(|| index.min(self.readings.len() - 1))
    }

    /// First index whose time is at or after `time_ms`, or the last index
    pub fn index_at_time(&self, time_ms: u64) -> Option<usize> {
        let index = self.readings.partition_point(|r| r.time_ms() < time_ms);
        self.clamp_index(index)
    }

    /// Readings with `start_ms <= time_ms <= end_ms`
    pub fn readings_between(&self, start_ms: u64, end_ms: u64) -> &[Arc<Reading>] {
        let lo = self.readings.partition_point(|r| r.time_ms() < start_ms);
        let hi = self.readings.partition_point(|r| r.time_ms() <= end_ms);
        if lo >= hi {
            return &[];
        }
        &self.readings[lo..hi]
    }

    /// Values of one channel, skipping readings that do not carry it
    pub fn channel_values(&self, field: Field) -> Vec<f64> {
        self.readings.iter().filter_map(|r| r.get(field)).collect()
    }
}
