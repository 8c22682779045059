//! Recorded source: lines read back from a persisted log file

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

use super::SourceError;

/// Finite, ordered line reader over a log file.
///
/// After the last line `read_next` returns `Ok(None)`, and keeps returning
/// it on every later call.
#[derive(Debug)]
pub struct RecordedSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    exhausted: bool,
    lines_read: u64,
}

impl RecordedSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            exhausted: false,
            lines_read: 0,
        }
    }

    /// File being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Lines returned so far
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Whether the end of the file has been reported
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Open the file. Opening an open source is a no-op.
    pub fn open(&mut self) -> Result<(), SourceError> {
        if self.reader.is_some() {
            return Ok(());
        }

        let file = File::open(&self.path).map_err(|e| SourceError::Open {
            target: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        self.reader = Some(BufReader::new(file));
        self.exhausted = false;
        self.lines_read = 0;
        info!(path = %self.path.display(), "recorded source opened");
        Ok(())
    }

    /// Next line without its terminator, or `None` at end of file
    pub fn read_next(&mut self) -> Result<Option<String>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        let reader = self.reader.as_mut().ok_or(SourceError::NotOpen)?;

        let mut raw = Vec::new();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            self.exhausted = true;
            return Ok(None);
        }

        self.lines_read += 1;
        let line = String::from_utf8_lossy(&raw);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Close the file. Safe to call on a source that never opened.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            info!(path = %self.path.display(), lines = self.lines_read, "recorded source closed");
        }
    }
}
