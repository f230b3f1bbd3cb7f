//! The contract every backing store satisfies.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// A sliding-window event store.
///
/// Implementations must appear linearizable per key: concurrent `increment`
/// calls for the same key never lose or double-count an event, and keys never
/// affect each other's counts. Any failure of the underlying medium is
/// reported as [`LimiterError::StoreUnavailable`](crate::LimiterError::StoreUnavailable).
#[async_trait]
pub trait Store: Send + Sync {
    /// Record one event for `key` at the current time and return the number
    /// of events for `key` within the trailing `window_ms`, including this one.
    ///
    /// This is not a peek: every call counts as a request.
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64>;

    /// Delete every recorded event for `key`. Resetting an unknown key is a no-op.
    async fn reset(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64> {
        (**self).increment(key, window_ms).await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        (**self).reset(key).await
    }
}
