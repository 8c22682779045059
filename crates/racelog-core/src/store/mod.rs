//! Telemetry Store
//!
//! Authoritative in-process state: the latest reading, the ordered history
//! and aggregate statistics. [`TelemetryStore::record`] is the single
//! mutation entry point during acquisition; history, current reading and
//! statistics change together under one write lock, so a reader never sees
//! them disagree.
//!
//! Observers registered with [`TelemetryStore::subscribe`] are called
//! synchronously after each mutation, outside the lock.

mod stats;

pub use stats::{Aggregate, FieldStats};

use std::collections::VecDeque;
use std::ops::{Bound, RangeBounds};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::config::StoreConfig;
use crate::reading::Reading;

/// Change notification delivered to observers
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A reading was appended
    Recorded(Arc<Reading>),
    /// The history was replaced wholesale (a recording was loaded or seeked)
    Replaced { len: usize },
    /// The history was emptied
    Cleared,
}

/// Receives store change notifications.
///
/// Called on the mutating thread; implementations must not call back into
/// code that mutates the same store.
pub trait StoreObserver: Send + Sync {
    fn on_store_event(&self, event: &StoreEvent);
}

impl<F> StoreObserver for F
where
    F: Fn(&StoreEvent) + Send + Sync,
{
    fn on_store_event(&self, event: &StoreEvent) {
        self(event)
    }
}

/// Identifies a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Consistent view of the store taken under one lock
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub current: Option<Arc<Reading>>,
    pub statistics: Aggregate,
    pub len: usize,
}

#[derive(Default)]
struct StoreState {
    history: VecDeque<Arc<Reading>>,
    stats: Aggregate,
}

impl StoreState {
    fn rebuild_stats(&mut self) {
        self.stats = Aggregate::from_readings(self.history.iter().map(|r| r.as_ref()));
    }
}

/// Thread-safe telemetry state shared by acquisition, replay and observers
pub struct TelemetryStore {
    state: RwLock<StoreState>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn StoreObserver>)>>,
    next_observer: AtomicU64,
    /// Maximum history length (`None` = unbounded)
    capacity: Option<usize>,
}

impl TelemetryStore {
    /// Create a store from configuration
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            capacity: config.history_capacity.filter(|c| *c > 0),
        }
    }

    /// Store that keeps every reading
    pub fn unbounded() -> Self {
        Self::new(&StoreConfig::default())
    }

    /// Store that keeps at most `capacity` readings, dropping the oldest
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(&StoreConfig {
            history_capacity: Some(capacity),
        })
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Append a reading, making it current and folding it into the statistics.
    ///
    /// When a bounded history evicts its oldest reading the statistics are
    /// rebuilt from what remains, so they always match a full scan.
    pub fn record(&self, reading: impl Into<Arc<Reading>>) {
        let event = self.apply_record(reading.into());
        self.notify(&event);
    }

    /// [`record`](Self::record) without notifying; the caller passes the
    /// returned event to [`notify`](Self::notify)
    pub(crate) fn apply_record(&self, reading: Arc<Reading>) -> StoreEvent {
        {
            let mut state = self.write_state();
            state.history.push_back(Arc::clone(&reading));

            let evicted = match self.capacity {
                Some(capacity) if state.history.len() > capacity => {
                    let excess = state.history.len() - capacity;
                    state.history.drain(..excess);
                    true
                }
                _ => false,
            };

            if evicted {
                state.rebuild_stats();
            } else {
                state.stats.push(&reading);
            }
        }
        StoreEvent::Recorded(reading)
    }

    /// Replace the whole history, e.g. when a recording is loaded.
    ///
    /// A bounded store keeps only the newest `capacity` readings.
    pub fn replace<I>(&self, readings: I)
    where
        I: IntoIterator<Item = Arc<Reading>>,
    {
        let event = self.apply_replace(readings);
        self.notify(&event);
    }

    pub(crate) fn apply_replace<I>(&self, readings: I) -> StoreEvent
    where
        I: IntoIterator<Item = Arc<Reading>>,
    {
        let len = {
            let mut state = self.write_state();
            state.history = readings.into_iter().collect();
            if let Some(capacity) = self.capacity {
                let excess = state.history.len().saturating_sub(capacity);
                state.history.drain(..excess);
            }
            state.rebuild_stats();
            state.history.len()
        };
        debug!(len, "store history replaced");
        StoreEvent::Replaced { len }
    }

    /// Empty the history, clear the current reading and reset statistics
    pub fn clear(&self) {
        let event = self.apply_clear();
        self.notify(&event);
    }

    pub(crate) fn apply_clear(&self) -> StoreEvent {
        {
            let mut state = self.write_state();
            state.history.clear();
            state.stats = Aggregate::new();
        }
        debug!("store cleared");
        StoreEvent::Cleared
    }

    /// Most recent reading
    pub fn current(&self) -> Option<Arc<Reading>> {
        self.read_state().history.back().cloned()
    }

    /// Copy of the full history, oldest first
    pub fn history(&self) -> Vec<Arc<Reading>> {
        self.read_state().history.iter().cloned().collect()
    }

    /// Copy of a slice of the history by index; out-of-range bounds are clamped
    pub fn history_range<R: RangeBounds<usize>>(&self, range: R) -> Vec<Arc<Reading>> {
        let state = self.read_state();
        let len = state.history.len();
        let start = match range.start_bound() {
            Bound::Included(s) => *s,
            Bound::Excluded(s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        }
        .min(len);
        let end = match range.end_bound() {
            Bound::Included(e) => e.saturating_add(1),
            Bound::Excluded(e) => *e,
            Bound::Unbounded => len,
        }
        .min(len);

        if start >= end {
            return Vec::new();
        }
        state.history.range(start..end).cloned().collect()
    }

    /// Readings with `start_ms <= time_ms <= end_ms`
    pub fn history_between(&self, start_ms: u64, end_ms: u64) -> Vec<Arc<Reading>> {
        let state = self.read_state();
        let history = &state.history;
        let lo = history.partition_point(|r| r.time_ms() < start_ms);
        let hi = history.partition_point(|r| r.time_ms() <= end_ms);
        if lo >= hi {
            return Vec::new();
        }
        history.range(lo..hi).cloned().collect()
    }

    /// Number of readings in history
    pub fn len(&self) -> usize {
        self.read_state().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate statistics over the current history
    pub fn statistics(&self) -> Aggregate {
        self.read_state().stats.clone()
    }

    /// Current reading, statistics and length from one consistent view
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.read_state();
        StoreSnapshot {
            current: state.history.back().cloned(),
            statistics: state.stats.clone(),
            len: state.history.len(),
        }
    }

    /// Register an observer
    pub fn subscribe(&self, observer: impl StoreObserver + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub(crate) fn notify(&self, event: &StoreEvent) {
        let observers: Vec<Arc<dyn StoreObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            observer.on_store_event(event);
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::unbounded()
    }
}
