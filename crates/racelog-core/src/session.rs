//! Live acquisition
//!
//! An [`AcquisitionSession`] owns one opened [`TelemetrySource`] and a worker
//! thread that drives it: read a line, parse it, optionally validate it,
//! record it in the store and hand it to the attached recorder. Malformed
//! lines are skipped and reported; the session only ends when it is
//! stopped, the source is exhausted, or the link fails.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::TelemetryConfig;
use crate::parser::{LineParser, ParseError, ParsedLine};
use crate::reading::Reading;
use crate::recorder::{Recorder, RecorderError};
use crate::source::{SourceError, SourceShutdown, TelemetrySource};
use crate::store::TelemetryStore;
use crate::validate::{RangeValidator, ValidationError};

/// Snapshot of a session's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    /// Lines delivered by the source, including headers and blanks
    pub lines_read: u64,
    /// Readings that reached the store
    pub readings_accepted: u64,
    /// Lines the parser rejected
    pub lines_rejected: u64,
    /// Readings dropped by validation
    pub readings_rejected: u64,
    /// Reads that timed out without a complete line
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lines_read: AtomicU64,
    readings_accepted: AtomicU64,
    lines_rejected: AtomicU64,
    readings_rejected: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> SessionCounters {
        SessionCounters {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            lines_rejected: self.lines_rejected.load(Ordering::Relaxed),
            readings_rejected: self.readings_rejected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone)]
pub enum SessionEnd {
    /// Stopped on request
    Stopped,
    /// A recorded source ran out of lines
    EndOfStream,
    /// The source failed; the session has to be restarted
    Failed(SourceError),
}

/// Things the worker reports while running
#[derive(Debug)]
pub enum SessionEvent {
    /// A line was skipped because it did not parse
    LineRejected { line_number: u64, error: ParseError },
    /// A reading was dropped by validation
    ReadingRejected { time_ms: u64, error: ValidationError },
    /// Writing to the recorder failed; the recorder has been detached
    RecorderFailed(RecorderError),
    /// The worker has exited; always the last event
    Ended(SessionEnd),
}

/// Recorder shared between the facade and a running session.
///
/// Attaching and detaching may happen while a session is writing.
#[derive(Clone, Default)]
pub struct RecorderSlot {
    inner: Arc<Mutex<Option<Recorder>>>,
}

impl RecorderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Recorder>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a recorder, returning the one it replaces
    pub fn attach(&self, recorder: Recorder) -> Option<Recorder> {
        self.lock().replace(recorder)
    }

    /// Remove the attached recorder
    pub fn detach(&self) -> Option<Recorder> {
        self.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Path of the attached recorder's file
    pub fn path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|r| r.path().to_path_buf())
    }

    /// Write to the attached recorder, if any.
    ///
    /// On failure the recorder is detached and closed before the error is
    /// returned, so one bad write does not repeat for every later reading.
    pub fn write(&self, reading: &Reading) -> Result<(), RecorderError> {
        let mut slot = self.lock();
        let Some(recorder) = slot.as_mut() else {
            return Ok(());
        };
        match recorder.write(reading) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(mut failed) = slot.take() {
                    let _ = failed.close();
                }
                Err(e)
            }
        }
    }
}

/// A running acquisition
pub struct AcquisitionSession {
    source: String,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    shutdown: Option<SourceShutdown>,
    worker: Option<JoinHandle<SessionEnd>>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl AcquisitionSession {
    /// Open `source` and start acquiring on a dedicated thread.
    ///
    /// Fails without starting a thread when the source cannot be opened.
    pub fn start(
        mut source: TelemetrySource,
        config: &TelemetryConfig,
        store: Arc<TelemetryStore>,
        recorder: RecorderSlot,
    ) -> Result<Self, SourceError> {
        let name = source.describe();
        source.open()?;

        let counters = Arc::new(Counters::default());
        let stop = Arc::new(AtomicBool::new(false));
        let shutdown = source.shutdown_handle();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            source,
            parser: LineParser::new(&config.wire),
            validator: RangeValidator::new(config.validation),
            store,
            recorder,
            counters: Arc::clone(&counters),
            stop: Arc::clone(&stop),
            events: events_tx,
        };
        let handle = thread::Builder::new()
            .name("racelog-acquisition".into())
            .spawn(move || worker.run())?;

        info!(source = %name, "acquisition session started");
        Ok(Self {
            source: name,
            counters,
            stop,
            shutdown,
            worker: Some(handle),
            events: Some(events_rx),
        })
    }

    /// Description of the source
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters.snapshot()
    }

    /// Lines the parser has rejected so far
    pub fn rejected_lines(&self) -> u64 {
        self.counters.lines_rejected.load(Ordering::Relaxed)
    }

    /// Whether the worker is still acquiring
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Take the event receiver. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }

    /// Stop acquiring and wait for the worker.
    ///
    /// An outstanding live read is interrupted within one poll interval.
    pub fn stop(mut self) -> SessionEnd {
        self.signal_stop();
        self.join()
    }

    /// Wait for the session to end on its own (e.g. end of a file)
    pub fn wait(mut self) -> SessionEnd {
        self.join()
    }

    fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(shutdown) = &self.shutdown {
            shutdown.shutdown();
        }
    }

    fn join(&mut self) -> SessionEnd {
        let Some(worker) = self.worker.take() else {
            return SessionEnd::Stopped;
        };
        match worker.join() {
            Ok(end) => end,
            Err(_) => {
                error!(source = %self.source, "acquisition worker panicked");
                SessionEnd::Failed(SourceError::Disconnected("acquisition worker panicked".into()))
            }
        }
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.signal_stop();
            self.join();
        }
    }
}

struct Worker {
    source: TelemetrySource,
    parser: LineParser,
    validator: RangeValidator,
    store: Arc<TelemetryStore>,
    recorder: RecorderSlot,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Worker {
    fn run(mut self) -> SessionEnd {
        let end = loop {
            if self.stop.load(Ordering::Acquire) {
                break SessionEnd::Stopped;
            }
            match self.source.read_next() {
                Ok(Some(line)) => self.handle_line(&line),
                Ok(None) => break SessionEnd::EndOfStream,
                Err(SourceError::Timeout) => {
                    Counters::bump(&self.counters.timeouts);
                }
                Err(SourceError::Closed) if self.stop.load(Ordering::Acquire) => {
                    break SessionEnd::Stopped;
                }
                Err(e) => {
                    error!(source = %self.source.describe(), "acquisition failed: {e}");
                    break SessionEnd::Failed(e);
                }
            }
        };

        self.source.close();
        let counters = self.counters.snapshot();
        info!(
            source = %self.source.describe(),
            end = ?end,
            accepted = counters.readings_accepted,
            rejected = counters.lines_rejected,
            "acquisition session ended"
        );
        let _ = self.events.send(SessionEvent::Ended(end.clone()));
        end
    }

    fn handle_line(&mut self, line: &str) {
        let line_number = Counters::bump(&self.counters.lines_read);
        let reading = match self.parser.parse_line(line) {
            Ok(ParsedLine::Reading(reading)) => reading,
            Ok(ParsedLine::Header(layout)) => {
                debug!(line = line_number, ?layout, "header line");
                return;
            }
            Ok(ParsedLine::Blank) => return,
            Err(error) => {
                Counters::bump(&self.counters.lines_rejected);
                warn!(line = line_number, "rejected line: {error}");
                let _ = self.events.send(SessionEvent::LineRejected { line_number, error });
                return;
            }
        };

        if let Err(error) = self.validator.check(&reading) {
            Counters::bump(&self.counters.readings_rejected);
            warn!(line = line_number, "rejected reading: {error}");
            let _ = self.events.send(SessionEvent::ReadingRejected {
                time_ms: reading.time_ms(),
                error,
            });
            return;
        }

        let reading = Arc::new(reading);
        self.store.record(Arc::clone(&reading));
        Counters::bump(&self.counters.readings_accepted);

        if let Err(e) = self.recorder.write(&reading) {
            error!("recording stopped: {e}");
            let _ = self.events.send(SessionEvent::RecorderFailed(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ValidationPolicy, WireFormat};
    use crate::reading::{Field, Layout};
    use crate::recorder::RecordTarget;
    use crate::source::{ByteStream, LiveSource, RecordedSource};
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    /// Stream that yields scripted chunks, then times out forever
    struct ScriptedStream {
        chunks: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(2));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }
    }

    impl ByteStream for ScriptedStream {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn scripted(chunks: Vec<io::Result<Vec<u8>>>) -> TelemetrySource {
        let stream = ScriptedStream {
            chunks: chunks.into(),
        };
        LiveSource::from_stream(Box::new(stream), Duration::from_millis(20)).into()
    }

    fn file_source(lines: &[&str]) -> (tempfile::NamedTempFile, TelemetrySource) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        let source = RecordedSource::new(file.path()).into();
        (file, source)
    }

    #[test]
    fn test_file_session_feeds_store() {
        let (_file, source) = file_source(&[
            "time_ms;speed;rpm;throttle;battery_temp",
            "100;10.5;2000;25;35.2",
            "garbage",
            "",
            "200;15.3;2500;40;35.5",
        ]);
        let store = Arc::new(TelemetryStore::unbounded());
        let mut session = AcquisitionSession::start(
            source,
            &TelemetryConfig::default(),
            Arc::clone(&store),
            RecorderSlot::new(),
        )
        .unwrap();
        let mut events = session.take_events().unwrap();

        assert!(matches!(session.wait(), SessionEnd::EndOfStream));
        assert_eq!(store.len(), 2);
        let speed = *store.statistics().field(Field::Speed);
        assert_eq!(speed.max(), Some(15.3));
        assert!((speed.mean().unwrap() - 12.9).abs() < 1e-9);

        match events.try_recv().unwrap() {
            SessionEvent::LineRejected { line_number, error } => {
                assert_eq!(line_number, 3);
                assert!(matches!(error, ParseError::FieldCountMismatch { found: 1, .. }));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Ended(SessionEnd::EndOfStream)
        ));
    }

    #[test]
    fn test_missing_file_fails_fast() {
        let source = RecordedSource::new("/nonexistent/racelog/session.csv").into();
        let result = AcquisitionSession::start(
            source,
            &TelemetryConfig::default(),
            Arc::new(TelemetryStore::unbounded()),
            RecorderSlot::new(),
        );
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }

    #[test]
    fn test_live_session_stops_promptly() {
        let source = scripted(vec![Ok(b"100;10.5;2000;25;35.2\n".to_vec())]);
        let store = Arc::new(TelemetryStore::unbounded());
        let session = AcquisitionSession::start(
            source,
            &TelemetryConfig::default(),
            Arc::clone(&store),
            RecorderSlot::new(),
        )
        .unwrap();

        while store.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(session.is_running());
        assert!(matches!(session.stop(), SessionEnd::Stopped));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_disconnect_ends_session() {
        let source = scripted(vec![
            Ok(b"100;10.5;2000;25;35.2\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        ]);
        let session = AcquisitionSession::start(
            source,
            &TelemetryConfig::default(),
            Arc::new(TelemetryStore::unbounded()),
            RecorderSlot::new(),
        )
        .unwrap();
        assert!(matches!(
            session.wait(),
            SessionEnd::Failed(SourceError::Disconnected(_))
        ));
    }

    #[test]
    fn test_validation_rejects_before_store_and_recorder() {
        let (_file, source) = file_source(&[
            "100;10.5;2000;25;35.2",
            "200;-4;2500;40;35.5",
            "300;12;2500;40;35.5",
        ]);
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("validated.csv");
        let slot = RecorderSlot::new();
        slot.attach(
            Recorder::open(
                &RecordTarget::File(log.clone()),
                &WireFormat::default(),
                Layout::Legacy,
            )
            .unwrap(),
        );

        let config = TelemetryConfig {
            validation: ValidationPolicy::Reject,
            ..TelemetryConfig::default()
        };
        let store = Arc::new(TelemetryStore::unbounded());
        let session =
            AcquisitionSession::start(source, &config, Arc::clone(&store), slot.clone()).unwrap();
        while session.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        let counters = session.counters();
        assert!(matches!(session.wait(), SessionEnd::EndOfStream));

        assert_eq!(counters.readings_accepted, 2);
        assert_eq!(counters.readings_rejected, 1);
        assert_eq!(store.len(), 2);

        drop(slot.detach());
        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(!contents.contains("-4"));
    }
}
