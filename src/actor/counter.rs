//! The per-key durable counter.

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::ratelimit::{SharedClock, WindowLog};

use super::protocol::{ActorRequest, ActorResponse};
use super::storage::SharedStorage;

/// Lifecycle of a counter's in-memory view of its stored list.
#[derive(Debug)]
enum CounterState {
    /// Nothing loaded yet; the next request reads storage first.
    Uninitialized,
    /// The loaded list, identical to what storage holds.
    Active(WindowLog),
}

/// A counter bound to exactly one key.
///
/// The counter is driven by a single task (see
/// [`ActorNamespace`](super::ActorNamespace)), so its read-modify-write of the
/// stored list never interleaves with another writer. Every mutation is
/// persisted before it is adopted in memory: if the write fails the counter
/// falls back to [`CounterState::Uninitialized`] and reloads the last committed
/// list on its next request.
pub struct DurableCounter {
    key: String,
    storage: SharedStorage,
    clock: SharedClock,
    state: CounterState,
    last_window_ms: Option<u64>,
}

impl std::fmt::Debug for DurableCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableCounter")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("last_window_ms", &self.last_window_ms)
            .finish()
    }
}

impl DurableCounter {
    /// Create an uninitialized counter for `key`.
    pub fn new(key: impl Into<String>, storage: SharedStorage, clock: SharedClock) -> Self {
        Self {
            key: key.into(),
            storage,
            clock,
            state: CounterState::Uninitialized,
            last_window_ms: None,
        }
    }

    /// The key this counter owns.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the stored list is currently loaded.
    pub fn is_active(&self) -> bool {
        matches!(self.state, CounterState::Active(_))
    }

    /// Serve a request path, answering the way a remote counter would.
    pub async fn fetch(&mut self, path: &str) -> ActorResponse {
        match ActorRequest::parse(path) {
            Ok(request) => self.handle(request).await,
            Err(response) => response,
        }
    }

    /// Serve a decoded request.
    pub async fn handle(&mut self, request: ActorRequest) -> ActorResponse {
        let result = match request {
            ActorRequest::Increment { window_ms } => {
                self.increment(window_ms).await.map(|count| count.to_string())
            }
            ActorRequest::Reset => self.reset().await.map(|()| "OK".to_string()),
        };

        match result {
            Ok(body) => ActorResponse::ok(body),
            Err(e) => {
                warn!(key = %self.key, request = ?request, error = %e, "Durable counter request failed");
                ActorResponse::internal_error(e.to_string())
            }
        }
    }

    /// Record an event, prune the window, persist, and return the count.
    pub async fn increment(&mut self, window_ms: u64) -> Result<u64> {
        let now = self.clock.now_ms();
        let mut log = self.take_log().await?;
        let count = log.record(now, window_ms);

        // Left uninitialized until the write lands
        self.storage.put(&self.key, &log).await?;
        self.state = CounterState::Active(log);
        self.last_window_ms = Some(window_ms);

        trace!(key = %self.key, window_ms = window_ms, count = count, "Incremented durable counter");
        Ok(count)
    }

    /// Delete the stored list.
    pub async fn reset(&mut self) -> Result<()> {
        self.storage.delete(&self.key).await?;
        self.state = CounterState::Active(WindowLog::new());

        trace!(key = %self.key, "Reset durable counter");
        Ok(())
    }

    /// Prune the stored list with the last window served and unload it.
    ///
    /// An empty list is deleted rather than stored. The next request reloads
    /// from storage, so skipping this step never affects a count.
    pub async fn hibernate(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, CounterState::Uninitialized);
        let (CounterState::Active(mut log), Some(window_ms)) = (state, self.last_window_ms) else {
            return Ok(());
        };

        let removed = log.prune(self.clock.now_ms(), window_ms);
        if removed > 0 {
            if log.is_empty() {
                self.storage.delete(&self.key).await?;
            } else {
                self.storage.put(&self.key, &log).await?;
            }
        }

        debug!(key = %self.key, pruned = removed, remaining = log.len(), "Durable counter hibernated");
        Ok(())
    }

    /// Move the current list out of the counter, reading storage if none is loaded.
    ///
    /// The counter is left uninitialized; callers put the list back once it is committed.
    async fn take_log(&mut self) -> Result<WindowLog> {
        match std::mem::replace(&mut self.state, CounterState::Uninitialized) {
            CounterState::Active(log) => Ok(log),
            CounterState::Uninitialized => {
                let log = self.storage.get(&self.key).await?.unwrap_or_default();
                debug!(key = %self.key, events = log.len(), "Durable counter activated");
                Ok(log)
            }
        }
    }
}
