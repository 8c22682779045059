//! Telemetry facade
//!
//! [`Telemetry`] is what a UI or CLI talks to. It owns the store, the replay
//! scheduler, the live session and the recorder, and hands out opaque
//! handles for the session, the loaded recording and the log file being
//! written. Live acquisition and replay never run at the same time.
//!
//! Operations that change what is running are serialized by one control
//! lock. Read-only queries never take it, and no facade lock is held while
//! the store notifies its observers, so an observer may call any query
//! here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, TelemetryConfig};
use crate::reading::{Layout, Reading};
use crate::recorder::{RecordTarget, Recorder, RecorderError};
use crate::replay::{CursorUpdate, Recording, ReplayError, ReplayScheduler, ReplayState};
use crate::session::{AcquisitionSession, RecorderSlot, SessionCounters, SessionEnd, SessionEvent};
use crate::source::{SourceConfig, SourceError, TelemetrySource};
use crate::store::{Aggregate, StoreSnapshot, TelemetryStore};

/// Errors returned by [`Telemetry`]
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// The operation conflicts with what is currently running
    #[error("Busy: {0}")]
    Busy(&'static str),

    #[error("Unknown or expired handle {0}")]
    UnknownHandle(Uuid),
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Underlying identifier
            pub fn id(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

handle_type!(
    /// Identifies a live acquisition session
    SessionHandle
);
handle_type!(
    /// Identifies a recording loaded for replay
    RecordingHandle
);
handle_type!(
    /// Identifies the log file currently being written
    RecorderHandle
);

struct ActiveSession {
    handle: SessionHandle,
    session: AcquisitionSession,
}

#[derive(Clone, Copy)]
struct LoadedRecording {
    handle: RecordingHandle,
    /// Scheduler generation the handle was issued for
    generation: u64,
}

/// Entry point for acquisition, queries, replay and persistence
pub struct Telemetry {
    config: Arc<TelemetryConfig>,
    store: Arc<TelemetryStore>,
    scheduler: ReplayScheduler,
    recorder: RecorderSlot,
    recorder_handle: Mutex<Option<RecorderHandle>>,
    /// Held across start, load, unload and cursor changes
    control: Mutex<()>,
    session: Mutex<Option<ActiveSession>>,
    recording: Mutex<Option<LoadedRecording>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Telemetry {
    /// Build the pipeline around a validated configuration
    pub fn new(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        config.validate()?;
        let store = Arc::new(TelemetryStore::new(&config.store));
        Ok(Self {
            scheduler: ReplayScheduler::new(Arc::clone(&store)),
            config: Arc::new(config),
            store,
            recorder: RecorderSlot::new(),
            recorder_handle: Mutex::new(None),
            control: Mutex::new(()),
            session: Mutex::new(None),
            recording: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// The store, e.g. to register observers
    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    // --- Acquisition ---

    /// Start acquiring from the configured kind of source.
    ///
    /// The store is cleared first. A loaded (not playing) recording is
    /// unloaded; a playing one makes this fail with [`TelemetryError::Busy`].
    pub fn start_session(&self, source: &SourceConfig) -> Result<SessionHandle, TelemetryError> {
        self.start_session_with(TelemetrySource::from_config(source, &self.config))
    }

    /// Start acquiring from an already constructed source
    pub fn start_session_with(&self, source: TelemetrySource) -> Result<SessionHandle, TelemetryError> {
        let _control = lock(&self.control);
        if self.session_running_any() {
            return Err(TelemetryError::Busy("a live session is already running"));
        }
        if self.scheduler.state() == ReplayState::Playing {
            return Err(TelemetryError::Busy("a recording is playing"));
        }
        let previous = lock(&self.session).take();
        if let Some(previous) = previous {
            info!(session = %previous.handle, "discarding ended session");
        }
        let loaded = lock(&self.recording).take();
        if loaded.is_some() {
            self.scheduler.unload();
        }

        self.store.clear();
        let session = AcquisitionSession::start(
            source,
            &self.config,
            Arc::clone(&self.store),
            self.recorder.clone(),
        )?;
        let handle = SessionHandle::new();
        info!(session = %handle, source = session.source(), "session started");
        *lock(&self.session) = Some(ActiveSession { handle, session });
        Ok(handle)
    }

    /// Stop a session and report why it ended
    pub fn stop_session(&self, handle: SessionHandle) -> Result<SessionEnd, TelemetryError> {
        let active = {
            let mut slot = lock(&self.session);
            match slot.take() {
                Some(active) if active.handle == handle => active,
                other => {
                    *slot = other;
                    return Err(TelemetryError::UnknownHandle(handle.id()));
                }
            }
        };
        let end = active.session.stop();
        info!(session = %handle, ?end, "session stopped");
        Ok(end)
    }

    /// Whether the session is still acquiring
    pub fn session_running(&self, handle: SessionHandle) -> Result<bool, TelemetryError> {
        self.with_session(handle, |s| s.is_running())
    }

    pub fn session_counters(&self, handle: SessionHandle) -> Result<SessionCounters, TelemetryError> {
        self.with_session(handle, |s| s.counters())
    }

    /// Take the session's event receiver (available once)
    pub fn session_events(
        &self,
        handle: SessionHandle,
    ) -> Result<Option<mpsc::UnboundedReceiver<SessionEvent>>, TelemetryError> {
        let mut slot = lock(&self.session);
        match slot.as_mut() {
            Some(active) if active.handle == handle => Ok(active.session.take_events()),
            _ => Err(TelemetryError::UnknownHandle(handle.id())),
        }
    }

    /// Lines rejected by the parser in the current (or last) session
    pub fn rejected_lines(&self) -> u64 {
        lock(&self.session)
            .as_ref()
            .map_or(0, |a| a.session.rejected_lines())
    }

    fn with_session<T>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&AcquisitionSession) -> T,
    ) -> Result<T, TelemetryError> {
        match lock(&self.session).as_ref() {
            Some(active) if active.handle == handle => Ok(f(&active.session)),
            _ => Err(TelemetryError::UnknownHandle(handle.id())),
        }
    }

    fn session_running_any(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|a| a.session.is_running())
    }

    // --- Queries ---

    pub fn current(&self) -> Option<Arc<Reading>> {
        self.store.current()
    }

    /// History by index range; pass `..` for all of it
    pub fn history<R: RangeBounds<usize>>(&self, range: R) -> Vec<Arc<Reading>> {
        self.store.history_range(range)
    }

    pub fn statistics(&self) -> Aggregate {
        self.store.statistics()
    }

    /// Current reading, statistics and length from one consistent view
    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    // --- Replay ---

    /// Load a log file for replay, replacing any loaded recording
    pub fn load_recording<P: AsRef<Path>>(&self, path: P) -> Result<RecordingHandle, TelemetryError> {
        if self.session_running_any() {
            return Err(TelemetryError::Busy("a live session is running"));
        }
        let recording = Recording::load(path, &self.config.wire)?;
        if recording.rejected_lines() > 0 {
            warn!(rejected = recording.rejected_lines(), "recording had malformed lines");
        }
        self.install_recording(recording)
    }

    /// Load an in-memory recording for replay
    pub fn load_readings(&self, recording: Recording) -> Result<RecordingHandle, TelemetryError> {
        self.install_recording(recording)
    }

    fn install_recording(&self, recording: Recording) -> Result<RecordingHandle, TelemetryError> {
        let _control = lock(&self.control);
        if self.session_running_any() {
            return Err(TelemetryError::Busy("a live session is running"));
        }
        let handle = RecordingHandle::new();
        let generation = self.scheduler.load(recording);
        *lock(&self.recording) = Some(LoadedRecording { handle, generation });
        Ok(handle)
    }

    /// Drop a loaded recording and clear the store
    pub fn unload_recording(&self, handle: RecordingHandle) -> Result<(), TelemetryError> {
        let _control = lock(&self.control);
        self.check_recording(handle)?;
        *lock(&self.recording) = None;
        self.scheduler.unload();
        Ok(())
    }

    /// Start or resume playback; needs a tokio runtime
    pub fn play(&self, handle: RecordingHandle, speed: f64) -> Result<(), TelemetryError> {
        let _control = lock(&self.control);
        self.check_recording(handle)?;
        Ok(self.scheduler.play(speed)?)
    }

    pub fn pause(&self, handle: RecordingHandle) -> Result<(), TelemetryError> {
        let _control = lock(&self.control);
        self.check_recording(handle)?;
        self.scheduler.pause();
        Ok(())
    }

    /// Stop playback and rewind
    pub fn stop_replay(&self, handle: RecordingHandle) -> Result<(), TelemetryError> {
        let _control = lock(&self.control);
        self.check_recording(handle)?;
        self.scheduler.stop();
        Ok(())
    }

    /// Move the cursor (clamped); returns where it landed
    pub fn seek(&self, handle: RecordingHandle, index: usize) -> Result<Option<usize>, TelemetryError> {
        let _control = lock(&self.control);
        self.check_recording(handle)?;
        Ok(self.scheduler.seek(index)?)
    }

    pub fn seek_to_time(
        &self,
        handle: RecordingHandle,
        time_ms: u64,
    ) -> Result<Option<usize>, TelemetryError> {
        let _control = lock(&self.control);
        self.check_recording(handle)?;
        Ok(self.scheduler.seek_to_time(time_ms)?)
    }

    pub fn cursor(&self, handle: RecordingHandle) -> Result<Option<usize>, TelemetryError> {
        self.check_recording(handle)?;
        Ok(self.scheduler.cursor())
    }

    pub fn replay_state(&self, handle: RecordingHandle) -> Result<ReplayState, TelemetryError> {
        self.check_recording(handle)?;
        Ok(self.scheduler.state())
    }

    /// The loaded recording, for navigation queries
    pub fn recording(&self, handle: RecordingHandle) -> Result<Arc<Recording>, TelemetryError> {
        self.check_recording(handle)?;
        self.scheduler
            .recording()
            .ok_or(TelemetryError::UnknownHandle(handle.id()))
    }

    /// Follow the replay cursor
    pub fn subscribe_cursor(&self) -> watch::Receiver<CursorUpdate> {
        self.scheduler.subscribe()
    }

    /// A handle is valid while its recording is the one the scheduler has
    /// loaded; it goes stale as soon as another load starts
    fn check_recording(&self, handle: RecordingHandle) -> Result<(), TelemetryError> {
        let loaded = *lock(&self.recording);
        match loaded {
            Some(l) if l.handle == handle && l.generation == self.scheduler.position().generation => {
                Ok(())
            }
            _ => Err(TelemetryError::UnknownHandle(handle.id())),
        }
    }

    // --- Persistence ---

    /// Start writing every live reading to `path` (created or truncated)
    pub fn begin_recording<P: AsRef<Path>>(&self, path: P) -> Result<RecorderHandle, TelemetryError> {
        self.begin_recording_to(RecordTarget::File(path.as_ref().to_path_buf()))
    }

    /// Start writing to a new, uniquely named file in the log directory
    pub fn begin_recording_in_log_dir(&self) -> Result<RecorderHandle, TelemetryError> {
        self.begin_recording_to(RecordTarget::from_log_config(&self.config.log))
    }

    fn begin_recording_to(&self, target: RecordTarget) -> Result<RecorderHandle, TelemetryError> {
        let mut handle_slot = lock(&self.recorder_handle);
        if self.recorder.is_attached() {
            return Err(TelemetryError::Busy("a log file is already being written"));
        }
        let recorder = Recorder::open_matching(&target, &self.config.wire, Layout::Extended)?;
        self.recorder.attach(recorder);
        let handle = RecorderHandle::new();
        *handle_slot = Some(handle);
        Ok(handle)
    }

    /// Path of the file being written, if any
    pub fn recording_path(&self) -> Option<PathBuf> {
        self.recorder.path()
    }

    /// Finish the log file and return its path.
    ///
    /// If the recorder was detached after a write failure the handle is
    /// released and [`RecorderError::Closed`] is returned.
    pub fn end_recording(&self, handle: RecorderHandle) -> Result<PathBuf, TelemetryError> {
        let mut handle_slot = lock(&self.recorder_handle);
        if *handle_slot != Some(handle) {
            return Err(TelemetryError::UnknownHandle(handle.id()));
        }
        *handle_slot = None;
        let mut recorder = self.recorder.detach().ok_or(RecorderError::Closed)?;
        recorder.close()?;
        Ok(recorder.path().to_path_buf())
    }
}
