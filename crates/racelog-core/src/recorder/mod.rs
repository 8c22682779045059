//! Recorder
//!
//! Appends readings to a log file in the wire format, header first, so the
//! file can be read back by [`crate::source::RecordedSource`] and the line
//! parser.
//!
//! Each data line goes to the file with a single write. A failed write never
//! leaves a fragment behind to be completed by a later write or close.

mod naming;

pub use naming::{log_file_name, next_sequence, LOG_EXTENSION};

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{LogConfig, WireFormat};
use crate::parser::LineParser;
use crate::reading::{Layout, Reading};

/// Give up on generated names after this many collisions
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Errors raised by the recorder
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to open log file '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write log file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Recorder is closed")]
    Closed,
}

/// Where a recording goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordTarget {
    /// Exactly this file, created or truncated
    File(PathBuf),
    /// A new, uniquely named file in this directory
    Directory { directory: PathBuf, prefix: String },
}

impl RecordTarget {
    /// Auto-named file in the configured log directory
    pub fn from_log_config(config: &LogConfig) -> Self {
        RecordTarget::Directory {
            directory: config.directory.clone(),
            prefix: config.file_prefix.clone(),
        }
    }
}

/// Append-only writer for one log file
pub struct Recorder {
    path: PathBuf,
    file: Option<File>,
    codec: LineParser,
    layout: Layout,
    /// Layout not fixed until the first reading arrives
    adaptive: bool,
    header_pending: bool,
    mixed_layouts: bool,
    rows: u64,
}

impl Recorder {
    /// Create the target file and write the header for `layout`
    pub fn open(target: &RecordTarget, format: &WireFormat, layout: Layout) -> Result<Self, RecorderError> {
        let mut recorder = Self::create(target, format, layout, false)?;
        recorder.write_header().map_err(|e| match e {
            RecorderError::Write { path, source } => RecorderError::Open { path, source },
            other => other,
        })?;
        info!(path = %recorder.path.display(), ?layout, "recording started");
        Ok(recorder)
    }

    /// Create the target file, taking the layout from the first reading
    /// written.
    ///
    /// The header is written together with that first reading, so readings
    /// read back with the layout they were recorded in. A file closed
    /// before any reading gets the header for `fallback`.
    pub fn open_matching(
        target: &RecordTarget,
        format: &WireFormat,
        fallback: Layout,
    ) -> Result<Self, RecorderError> {
        let recorder = Self::create(target, format, fallback, true)?;
        info!(path = %recorder.path.display(), "recording started");
        Ok(recorder)
    }

    fn create(
        target: &RecordTarget,
        format: &WireFormat,
        layout: Layout,
        adaptive: bool,
    ) -> Result<Self, RecorderError> {
        let (path, file) = match target {
            RecordTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|source| RecorderError::Open {
                        path: path.clone(),
                        source,
                    })?;
                }
                let file = File::create(path).map_err(|source| RecorderError::Open {
                    path: path.clone(),
                    source,
                })?;
                (path.clone(), file)
            }
            RecordTarget::Directory { directory, prefix } => create_unique(directory, prefix)?,
        };

        Ok(Self {
            path,
            file: Some(file),
            codec: LineParser::new(format),
            layout,
            adaptive,
            header_pending: true,
            mixed_layouts: false,
            rows: 0,
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layout data lines are written in (the fallback until the first
    /// reading of an [`open_matching`](Self::open_matching) recorder)
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Data lines written so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Append one reading to the file.
    ///
    /// A reading in another layout than the file's is padded with channel
    /// defaults (legacy into extended) or loses the extra channels
    /// (extended into legacy).
    pub fn write(&mut self, reading: &Reading) -> Result<(), RecorderError> {
        if self.file.is_none() {
            return Err(RecorderError::Closed);
        }
        if self.header_pending {
            if self.adaptive {
                self.layout = reading.layout();
            }
            self.write_header()?;
        } else if reading.layout() != self.layout && !self.mixed_layouts {
            self.mixed_layouts = true;
            warn!(
                path = %self.path.display(),
                file = ?self.layout,
                reading = ?reading.layout(),
                "reading layout differs from the log file; converting"
            );
        }

        let line = self.codec.format_line(reading, self.layout);
        self.write_line(&line)?;
        self.rows += 1;
        Ok(())
    }

    /// Close the file. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), RecorderError> {
        if self.file.is_some() && self.header_pending {
            self.write_header()?;
        }
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush().map_err(|source| RecorderError::Write {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), rows = self.rows, "recording saved");
        Ok(())
    }

    /// Attempted once; a failed header is not retried on close
    fn write_header(&mut self) -> Result<(), RecorderError> {
        self.header_pending = false;
        let header = self.codec.header(self.layout).to_string();
        self.write_line(&header)
    }

    fn write_line(&mut self, line: &str) -> Result<(), RecorderError> {
        let file = self.file.as_mut().ok_or(RecorderError::Closed)?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        file.write_all(buf.as_bytes()).map_err(|source| {
            error!(path = %self.path.display(), "log write failed: {source}");
            RecorderError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Create a new file with a generated name that does not exist yet
fn create_unique(directory: &Path, prefix: &str) -> Result<(PathBuf, File), RecorderError> {
    fs::create_dir_all(directory).map_err(|source| RecorderError::Open {
        path: directory.to_path_buf(),
        source,
    })?;

    let now = Local::now();
    let mut last_error = None;
    for _ in 0..MAX_NAME_ATTEMPTS {
        let path = directory.join(log_file_name(prefix, &now, next_sequence()));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_error = Some((path, e)),
            Err(source) => return Err(RecorderError::Open { path, source }),
        }
    }

    let (path, source) = last_error.unwrap_or_else(|| {
        (
            directory.to_path_buf(),
            io::Error::new(io::ErrorKind::AlreadyExists, "no free log file name"),
        )
    });
    Err(RecorderError::Open { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RecordedSource;
    use pretty_assertions::assert_eq;

    fn dir_target(dir: &Path) -> RecordTarget {
        RecordTarget::Directory {
            directory: dir.to_path_buf(),
            prefix: "run".into(),
        }
    }

    #[test]
    fn test_header_written_once_before_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");
        let format = WireFormat::default();

        let mut recorder =
            Recorder::open(&RecordTarget::File(path.clone()), &format, Layout::Legacy).unwrap();
        recorder.write(&Reading::legacy(100, 10.5, 2000, 25.0, 35.2)).unwrap();
        recorder.write(&Reading::legacy(200, 15.3, 2500, 40.0, 35.5)).unwrap();
        recorder.close().unwrap();
        recorder.close().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "time_ms;speed;rpm;throttle;battery_temp\n100;10.5;2000;25;35.2\n200;15.3;2500;40;35.5\n"
        );
    }

    #[test]
    fn test_matching_recorder_takes_layout_from_first_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");
        let format = WireFormat::default();

        let mut recorder =
            Recorder::open_matching(&RecordTarget::File(path.clone()), &format, Layout::Extended)
                .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        recorder.write(&Reading::legacy(100, 10.5, 2000, 25.0, 35.2)).unwrap();
        assert_eq!(recorder.layout(), Layout::Legacy);

        // Later extended readings are cut down to the file's layout
        let mut values = [1.0; crate::reading::CHANNEL_COUNT];
        values[0] = 15.3;
        recorder.write(&Reading::extended(200, values)).unwrap();
        recorder.close().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "time_ms;speed;rpm;throttle;battery_temp\n100;10.5;2000;25;35.2\n200;15.3;1;1;1\n"
        );
    }

    #[test]
    fn test_matching_recorder_without_readings_still_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let format = WireFormat::default();

        let mut recorder =
            Recorder::open_matching(&RecordTarget::File(path.clone()), &format, Layout::Legacy)
                .unwrap();
        recorder.close().unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "time_ms;speed;rpm;throttle;battery_temp\n"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_write_leaves_nothing_to_flush() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let mut recorder = Recorder::open_matching(
            &RecordTarget::File(full.to_path_buf()),
            &WireFormat::default(),
            Layout::Legacy,
        )
        .unwrap();
        assert!(matches!(
            recorder.write(&Reading::legacy(0, 1.0, 800, 0.0, 20.0)),
            Err(RecorderError::Write { .. })
        ));
        assert_eq!(recorder.rows(), 0);
        recorder.close().unwrap();
        assert!(!recorder.is_open());
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder =
            Recorder::open(&dir_target(dir.path()), &WireFormat::default(), Layout::Extended)
                .unwrap();
        recorder.close().unwrap();
        assert!(matches!(
            recorder.write(&Reading::legacy(0, 0.0, 0, 0.0, 0.0)),
            Err(RecorderError::Closed)
        ));
    }

    #[test]
    fn test_rapid_sessions_get_unique_files() {
        let dir = tempfile::tempdir().unwrap();
        let format = WireFormat::default();
        let paths: Vec<PathBuf> = (0..20)
            .map(|_| {
                Recorder::open(&dir_target(dir.path()), &format, Layout::Extended)
                    .unwrap()
                    .path()
                    .to_path_buf()
            })
            .collect();

        let mut unique = paths.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), paths.len());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 20);
    }

    #[test]
    fn test_open_in_missing_directory_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let recorder =
            Recorder::open(&dir_target(&nested), &WireFormat::default(), Layout::Legacy).unwrap();
        assert!(recorder.path().starts_with(&nested));
    }

    #[test]
    fn test_open_fails_when_directory_is_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = Recorder::open(&dir_target(file.path()), &WireFormat::default(), Layout::Legacy);
        assert!(matches!(result, Err(RecorderError::Open { .. })));
    }

    #[test]
    fn test_recorded_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let format = WireFormat::default();
        let parser = LineParser::new(&format);
        let mut values = [0.0; crate::reading::CHANNEL_COUNT];
        for (i, v) in values.iter_mut().enumerate() {
            *v = i as f64 * 1.25 - 3.1;
        }
        let original = vec![
            Reading::extended(0, values),
            Reading::extended(20, values.map(|v| v * 0.5)),
        ];

        let mut recorder =
            Recorder::open(&dir_target(dir.path()), &format, Layout::Extended).unwrap();
        for reading in &original {
            recorder.write(reading).unwrap();
        }
        recorder.close().unwrap();

        let mut source = RecordedSource::new(recorder.path());
        source.open().unwrap();
        let mut read_back = Vec::new();
        while let Some(line) = source.read_next().unwrap() {
            if let Some(reading) = parser.parse_reading(&line).unwrap() {
                read_back.push(reading);
            }
        }
        assert_eq!(read_back, original);
    }
}
