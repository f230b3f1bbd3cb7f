//! Sliding-window event log.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Lower bound of the window ending at `now`.
///
/// Events stamped exactly at the bound are still inside the window.
pub fn window_start(now: u64, window_ms: u64) -> u64 {
    now.saturating_sub(window_ms)
}

/// The ordered event timestamps recorded for a single key.
///
/// Each call to [`record`](WindowLog::record) appends one entry, so two
/// events within the same millisecond are counted separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowLog {
    timestamps: VecDeque<u64>,
}

impl WindowLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from previously persisted timestamps.
    pub fn from_timestamps(timestamps: impl IntoIterator<Item = u64>) -> Self {
        Self {
            timestamps: timestamps.into_iter().collect(),
        }
    }

    /// Record an event at `now`, prune everything that fell out of the
    /// window, and return the number of events within `[now - window, now]`.
    ///
    /// The event just recorded always survives; with a zero window it is the
    /// only one that does. Events stamped after `now` are kept but not counted.
    pub fn record(&mut self, now: u64, window_ms: u64) -> u64 {
        if window_ms == 0 {
            self.timestamps.clear();
            self.timestamps.push_back(now);
            return 1;
        }

        self.timestamps.push_back(now);
        self.prune(now, window_ms);
        self.count_until(now)
    }

    /// Number of held events stamped at or before `now`.
    pub fn count_until(&self, now: u64) -> u64 {
        self.timestamps.iter().filter(|&&ts| ts <= now).count() as u64
    }

    /// Drop every event older than the window ending at `now`.
    ///
    /// Returns how many events were removed.
    pub fn prune(&mut self, now: u64, window_ms: u64) -> usize {
        let start = window_start(now, window_ms);
        let before = self.timestamps.len();

        // A clock stepping backwards can leave an old stamp behind a newer
        // one, so this cannot stop at the first retained entry.
        self.timestamps.retain(|&ts| ts >= start);

        before - self.timestamps.len()
    }

    /// Number of events currently held.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the log holds no events.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Iterate over the held timestamps, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.timestamps.iter()
    }
}
