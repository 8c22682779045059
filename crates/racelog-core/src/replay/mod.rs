//! Replay
//!
//! [`ReplayScheduler`] paces a loaded [`Recording`] into a [`TelemetryStore`]
//! with the original inter-reading timing, optionally scaled by a speed
//! multiplier, and publishes a single cursor that any number of observers can
//! follow through [`ReplayScheduler::subscribe`].
//!
//! While a recording is loaded the store always holds exactly the readings
//! up to and including the cursor: loading and seeking replace the history,
//! each playback step appends one reading. The store is updated before the
//! new cursor is published, and store observers are notified after that, so
//! neither a cursor subscriber nor a store observer sees the cursor ahead
//! of the store.
//!
//! Playback runs as a tokio task that is aborted on pause, seek or stop.
//! Deadlines are computed from the instant playback (re)started, so per-step
//! scheduling latency does not add up over long recordings.

mod recording;

pub use recording::Recording;

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::store::TelemetryStore;

/// Replay errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayError {
    #[error("No recording loaded")]
    NotLoaded,

    #[error("Invalid playback speed {0}; must be finite and positive")]
    InvalidSpeed(f64),

    #[error("Playback needs a running tokio runtime")]
    NoRuntime,
}

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayState {
    /// Nothing loaded
    Idle,
    /// Recording loaded, playback not started
    Loaded,
    Playing,
    Paused,
    /// Cursor reached the last reading during playback
    Finished,
}

/// What observers of the cursor receive
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CursorUpdate {
    /// Increments on every load, so observers can tell recordings apart
    pub generation: u64,
    /// Current index, absent when nothing (or an empty recording) is loaded
    pub index: Option<usize>,
    pub state: ReplayState,
    /// `time_ms` of the reading under the cursor
    pub time_ms: Option<u64>,
    /// Speed of the current or last playback
    pub speed: f64,
}

impl CursorUpdate {
    fn idle() -> Self {
        Self {
            generation: 0,
            index: None,
            state: ReplayState::Idle,
            time_ms: None,
            speed: 1.0,
        }
    }
}

struct ReplayInner {
    state: ReplayState,
    recording: Option<Arc<Recording>>,
    cursor: Option<usize>,
    speed: f64,
    generation: u64,
    /// Bumped whenever a playback task is started or cancelled; a task
    /// that wakes up with a stale epoch exits without advancing
    epoch: u64,
    playback: Option<JoinHandle<()>>,
}

impl ReplayInner {
    fn update(&self) -> CursorUpdate {
        CursorUpdate {
            generation: self.generation,
            index: self.cursor,
            state: self.state,
            time_ms: self.current_time_ms(),
            speed: self.speed,
        }
    }

    fn current_time_ms(&self) -> Option<u64> {
        let recording = self.recording.as_ref()?;
        recording.get(self.cursor?).map(|r| r.time_ms())
    }

    fn cancel_playback(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.playback.take() {
            task.abort();
        }
    }

    fn at_end(&self) -> bool {
        match (&self.recording, self.cursor) {
            (Some(recording), Some(cursor)) => cursor + 1 >= recording.len(),
            _ => true,
        }
    }
}

struct Shared {
    store: Arc<TelemetryStore>,
    inner: Mutex<ReplayInner>,
    cursor_tx: watch::Sender<CursorUpdate>,
    recording_tx: watch::Sender<Option<Arc<Recording>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ReplayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the store to the prefix ending at the cursor, then publish
    fn sync_store(&self, inner: &ReplayInner) {
        let event = match (&inner.recording, inner.cursor) {
            (Some(recording), Some(cursor)) => self
                .store
                .apply_replace(recording.readings()[..=cursor].iter().cloned()),
            _ => self.store.apply_clear(),
        };
        self.publish(inner);
        self.store.notify(&event);
    }

    fn publish(&self, inner: &ReplayInner) {
        self.cursor_tx.send_replace(inner.update());
    }
}

/// Paces a recording into a store and owns the replay cursor.
///
/// All state changes, together with the store update they imply, happen
/// under one lock, so cursor advances never overlap. Store observers are
/// called while that lock is held: they may use the read-only accessors
/// ([`cursor`](Self::cursor), [`state`](Self::state),
/// [`position`](Self::position), [`speed`](Self::speed),
/// [`recording`](Self::recording) and the watch channel), which never take
/// the lock, but must not call methods that change the cursor.
pub struct ReplayScheduler {
    shared: Arc<Shared>,
}

impl ReplayScheduler {
    /// Scheduler delivering into `store`
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        let (cursor_tx, _) = watch::channel(CursorUpdate::idle());
        let (recording_tx, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                store,
                inner: Mutex::new(ReplayInner {
                    state: ReplayState::Idle,
                    recording: None,
                    cursor: None,
                    speed: 1.0,
                    generation: 0,
                    epoch: 0,
                    playback: None,
                }),
                cursor_tx,
                recording_tx,
            }),
        }
    }

    /// Store this scheduler delivers into
    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.shared.store
    }

    /// Load a recording, discarding any previous one and its cursor.
    ///
    /// The cursor starts at 0 (absent for an empty recording) and the store
    /// is replaced with the first reading. Returns the generation published
    /// with the cursor for this recording.
    pub fn load(&self, recording: impl Into<Arc<Recording>>) -> u64 {
        let recording = recording.into();
        let mut inner = self.shared.lock();
        inner.cancel_playback();
        inner.cursor = recording.clamp_index(0);
        inner.recording = Some(Arc::clone(&recording));
        inner.state = ReplayState::Loaded;
        inner.generation += 1;
        self.shared.recording_tx.send_replace(Some(Arc::clone(&recording)));
        info!(
            readings = recording.len(),
            duration_ms = recording.duration_ms(),
            "recording loaded for replay"
        );
        self.shared.sync_store(&inner);
        inner.generation
    }

    /// Drop the loaded recording and clear the store
    pub fn unload(&self) {
        let mut inner = self.shared.lock();
        inner.cancel_playback();
        inner.recording = None;
        inner.cursor = None;
        inner.state = ReplayState::Idle;
        self.shared.recording_tx.send_replace(None);
        debug!("recording unloaded");
        self.shared.sync_store(&inner);
    }

    /// Start or resume playback at `speed` times the original pace.
    ///
    /// Resumes from the current cursor. When the cursor already sits on the
    /// last reading the scheduler goes straight to [`ReplayState::Finished`].
    /// Calling `play` while playing changes the speed from the current
    /// reading on.
    pub fn play(&self, speed: f64) -> Result<(), ReplayError> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(ReplayError::InvalidSpeed(speed));
        }

        let mut inner = self.shared.lock();
        match inner.state {
            ReplayState::Idle => return Err(ReplayError::NotLoaded),
            ReplayState::Playing if inner.speed == speed => return Ok(()),
            _ => {}
        }
        let runtime = Handle::try_current().map_err(|_| ReplayError::NoRuntime)?;

        inner.cancel_playback();
        inner.speed = speed;
        if inner.at_end() {
            inner.state = ReplayState::Finished;
            debug!(cursor = ?inner.cursor, "nothing left to play");
            self.shared.publish(&inner);
            return Ok(());
        }

        inner.state = ReplayState::Playing;
        debug!(cursor = ?inner.cursor, speed, "playback started");
        self.spawn_playback(&mut inner, &runtime);
        self.shared.publish(&inner);
        Ok(())
    }

    /// Freeze the cursor. A no-op unless playing.
    pub fn pause(&self) {
        let mut inner = self.shared.lock();
        if inner.state != ReplayState::Playing {
            return;
        }
        inner.cancel_playback();
        inner.state = ReplayState::Paused;
        debug!(cursor = ?inner.cursor, "playback paused");
        self.shared.publish(&inner);
    }

    /// Stop playback and rewind to the first reading
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        inner.cancel_playback();
        let Some(recording) = inner.recording.clone() else {
            return;
        };
        inner.cursor = recording.clamp_index(0);
        inner.state = ReplayState::Loaded;
        debug!("playback stopped");
        self.shared.sync_store(&inner);
    }

    /// Move the cursor, clamped to the recording.
    ///
    /// Playback keeps running from the new position if it was running; a
    /// finished replay becomes paused so it can be resumed. Returns the
    /// resulting cursor.
    pub fn seek(&self, index: usize) -> Result<Option<usize>, ReplayError> {
        let mut inner = self.shared.lock();
        let recording = inner.recording.clone().ok_or(ReplayError::NotLoaded)?;
        let target = recording.clamp_index(index);
        self.seek_locked(&mut inner, target);
        Ok(target)
    }

    /// Move the cursor to the first reading at or after `time_ms`
    pub fn seek_to_time(&self, time_ms: u64) -> Result<Option<usize>, ReplayError> {
        let mut inner = self.shared.lock();
        let recording = inner.recording.clone().ok_or(ReplayError::NotLoaded)?;
        let target = recording.index_at_time(time_ms);
        self.seek_locked(&mut inner, target);
        Ok(target)
    }

    fn seek_locked(&self, inner: &mut MutexGuard<'_, ReplayInner>, target: Option<usize>) {
        inner.cursor = target;
        match inner.state {
            ReplayState::Playing => {
                inner.cancel_playback();
                if inner.at_end() {
                    inner.state = ReplayState::Finished;
                } else if let Ok(runtime) = Handle::try_current() {
                    self.spawn_playback(inner, &runtime);
                } else {
                    inner.state = ReplayState::Paused;
                }
            }
            ReplayState::Finished => inner.state = ReplayState::Paused,
            _ => {}
        }
        debug!(cursor = ?target, state = ?inner.state, "seek");
        self.shared.sync_store(inner);
    }

    /// Current cursor; never blocks on playback
    pub fn cursor(&self) -> Option<usize> {
        self.shared.cursor_tx.borrow().index
    }

    pub fn state(&self) -> ReplayState {
        self.shared.cursor_tx.borrow().state
    }

    /// Latest published cursor update
    pub fn position(&self) -> CursorUpdate {
        *self.shared.cursor_tx.borrow()
    }

    /// Speed of the current or last playback
    pub fn speed(&self) -> f64 {
        self.shared.cursor_tx.borrow().speed
    }

    /// Currently loaded recording
    pub fn recording(&self) -> Option<Arc<Recording>> {
        self.shared.recording_tx.borrow().clone()
    }

    /// Follow the cursor. The receiver starts at the current position.
    pub fn subscribe(&self) -> watch::Receiver<CursorUpdate> {
        self.shared.cursor_tx.subscribe()
    }

    fn spawn_playback(&self, inner: &mut ReplayInner, runtime: &Handle) {
        inner.epoch += 1;
        let task = runtime.spawn(run_playback(Arc::clone(&self.shared), inner.epoch, inner.speed));
        inner.playback = Some(task);
    }
}

impl Drop for ReplayScheduler {
    fn drop(&mut self) {
        self.shared.lock().cancel_playback();
    }
}

/// Offset of `time_ms` from `base_ms`, scaled by `speed`
fn scaled_delay(base_ms: u64, time_ms: u64, speed: f64) -> Duration {
    let offset_ms = time_ms.saturating_sub(base_ms);
    Duration::from_nanos((offset_ms as f64 * 1_000_000.0 / speed).round() as u64)
}

/// Advance the cursor one reading at a time until the end or cancellation
async fn run_playback(shared: Arc<Shared>, epoch: u64, speed: f64) {
    let anchor = Instant::now();
    let base_ms = match shared.lock().current_time_ms() {
        Some(ms) => ms,
        None => return,
    };

    loop {
        let deadline = {
            let inner = shared.lock();
            if inner.epoch != epoch {
                return;
            }
            let (Some(recording), Some(cursor)) = (&inner.recording, inner.cursor) else {
                return;
            };
            let Some(next) = recording.get(cursor + 1) else {
                return;
            };
            anchor + scaled_delay(base_ms, next.time_ms(), speed)
        };

        tokio::time::sleep_until(deadline).await;

        let mut inner = shared.lock();
        if inner.epoch != epoch {
            return;
        }
        let (Some(recording), Some(cursor)) = (inner.recording.clone(), inner.cursor) else {
            return;
        };
        let next = cursor + 1;
        let Some(reading) = recording.get(next).cloned() else {
            return;
        };

        inner.cursor = Some(next);
        let finished = next + 1 >= recording.len();
        if finished {
            inner.state = ReplayState::Finished;
            inner.playback = None;
            debug!(cursor = next, "playback finished");
        }
        let event = shared.store.apply_record(reading);
        shared.publish(&inner);
        shared.store.notify(&event);
        if finished {
            return;
        }
    }
}
