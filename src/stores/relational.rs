//! Store backed by a table of `(key, timestamp)` rows.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::ratelimit::{window_start, SharedClock, Store, SystemClock};

use super::locks::KeyLocks;

/// The row operations a timestamp table offers.
///
/// Each operation is one atomic step for its key. A table shared between
/// processes runs it as a single transaction.
#[async_trait]
pub trait TimestampTable: Send + Sync {
    /// In one atomic step: insert a row for `key` stamped `timestamp`, delete
    /// the rows for `key` stamped before `start`, and count the rows for `key`
    /// stamped within `[start, timestamp]`.
    async fn insert_prune_count(&self, key: &str, timestamp: u64, start: u64) -> Result<u64>;

    /// Delete every row for `key`, returning how many went.
    async fn delete_all_for(&self, key: &str) -> Result<u64>;
}

#[async_trait]
impl<T: TimestampTable + ?Sized> TimestampTable for Arc<T> {
    async fn insert_prune_count(&self, key: &str, timestamp: u64, start: u64) -> Result<u64> {
        (**self).insert_prune_count(key, timestamp, start).await
    }

    async fn delete_all_for(&self, key: &str) -> Result<u64> {
        (**self).delete_all_for(key).await
    }
}

/// A [`Store`] over any [`TimestampTable`].
///
/// Callers in this process queue per key before reaching the table, so they
/// never contend for the same rows. Pruning is scoped to the key: limiters
/// with different windows may share a table without trimming each other's rows.
pub struct DatabaseStore<T> {
    table: T,
    clock: SharedClock,
    locks: KeyLocks,
}

impl<T: TimestampTable> DatabaseStore<T> {
    /// Create a store stamping rows with the system clock.
    pub fn new(table: T) -> Self {
        Self::with_clock(table, Arc::new(SystemClock))
    }

    pub fn with_clock(table: T, clock: SharedClock) -> Self {
        Self {
            table,
            clock,
            locks: KeyLocks::new(),
        }
    }

    /// The wrapped table.
    pub fn table(&self) -> &T {
        &self.table
    }
}

impl<T> std::fmt::Debug for DatabaseStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseStore")
            .field("locked_keys", &self.locks.len())
            .finish()
    }
}

#[async_trait]
impl<T: TimestampTable> Store for DatabaseStore<T> {
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64> {
        let _guard = self.locks.lock(key).await;
        let now = self.clock.now_ms();
        let start = window_start(now, window_ms);

        let count = self.table.insert_prune_count(key, now, start).await?;

        trace!(key = %key, count = count, "Database store increment");
        Ok(count)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.locks.lock(key).await;
        let deleted = self.table.delete_all_for(key).await?;

        trace!(key = %key, deleted = deleted, "Database store reset");
        Ok(())
    }
}

/// One row of a [`MemoryTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRow {
    pub key: String,
    pub timestamp: u64,
}

/// An in-process timestamp table.
#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: Mutex<Vec<TimestampRow>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows across all keys.
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }
}

#[async_trait]
impl TimestampTable for MemoryTable {
    async fn insert_prune_count(&self, key: &str, timestamp: u64, start: u64) -> Result<u64> {
        let mut rows = self.rows.lock();
        rows.push(TimestampRow {
            key: key.to_string(),
            timestamp,
        });

        let before = rows.len();
        rows.retain(|row| row.key != key || row.timestamp >= start);
        let pruned = before - rows.len();

        let count = rows
            .iter()
            .filter(|row| row.key == key && row.timestamp <= timestamp)
            .count();

        trace!(key = %key, pruned = pruned, "Pruned timestamp rows");
        Ok(count as u64)
    }

    async fn delete_all_for(&self, key: &str) -> Result<u64> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|row| row.key != key);
        Ok((before - rows.len()) as u64)
    }
}
