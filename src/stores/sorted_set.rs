//! Store backed by a sorted collection scored by event time.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::error::Result;
use crate::ratelimit::{window_start, SharedClock, Store, SystemClock};

/// A medium holding one sorted collection per key.
///
/// Both operations must be atomic per key; a medium shared between processes
/// has to use its own transaction primitive to guarantee that.
#[async_trait]
pub trait SortedSetBackend: Send + Sync {
    /// In one atomic step: add `member` with `score`, remove every member
    /// scored below `start`, and return the number of members scored within
    /// `[start, score]`.
    async fn add_prune_count(&self, key: &str, member: &str, score: u64, start: u64) -> Result<u64>;

    /// Delete the whole collection for `key`.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// A [`Store`] over any [`SortedSetBackend`].
///
/// Members are unique per call (`{now}-{instance}-{seq}`) so that two events
/// in the same millisecond, from this process or another, never collapse
/// into one.
pub struct SortedSetStore<B> {
    backend: B,
    clock: SharedClock,
    instance: String,
    seq: AtomicU64,
}

impl<B: SortedSetBackend> SortedSetStore<B> {
    /// Create a store stamping events with the system clock.
    pub fn new(backend: B) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: B, clock: SharedClock) -> Self {
        Self {
            backend,
            clock,
            instance: uuid::Uuid::new_v4().simple().to_string(),
            seq: AtomicU64::new(0),
        }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn next_member(&self, now: u64) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", now, self.instance, seq)
    }
}

impl<B> std::fmt::Debug for SortedSetStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedSetStore")
            .field("instance", &self.instance)
            .finish()
    }
}

#[async_trait]
impl<B: SortedSetBackend> Store for SortedSetStore<B> {
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64> {
        let now = self.clock.now_ms();
        let start = window_start(now, window_ms);
        let member = self.next_member(now);

        let count = self.backend.add_prune_count(key, &member, now, start).await?;

        trace!(key = %key, member = %member, count = count, "Sorted set increment");
        Ok(count)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await?;
        trace!(key = %key, "Sorted set reset");
        Ok(())
    }
}

/// In-process sorted collections.
#[derive(Debug, Default)]
pub struct MemorySortedSet {
    sets: DashMap<String, BTreeSet<(u64, String)>>,
}

impl MemorySortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members currently stored for `key`.
    pub fn cardinality(&self, key: &str) -> usize {
        self.sets.get(key).map(|set| set.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SortedSetBackend for MemorySortedSet {
    async fn add_prune_count(&self, key: &str, member: &str, score: u64, start: u64) -> Result<u64> {
        // The entry guard holds the shard lock for the whole step
        let mut set = self.sets.entry(key.to_string()).or_default();

        set.insert((score, member.to_string()));
        let kept = set.split_off(&(start, String::new()));
        *set = kept;

        let count = set.iter().take_while(|(s, _)| *s <= score).count();
        Ok(count as u64)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.sets.remove(key);
        Ok(())
    }
}
