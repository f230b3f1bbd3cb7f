//! Per-key async mutexes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A sharded map of per-key mutexes.
///
/// Holders of different keys never wait on each other. A key's mutex is
/// dropped from the map as soon as nobody holds or waits on it, including
/// when a waiter is cancelled, so the map only grows with the number of keys
/// in flight.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive access to one key, released on drop.
pub struct KeyGuard<'a> {
    // Fields drop in order: the mutex is released before the entry is checked
    _guard: OwnedMutexGuard<()>,
    _forget: ForgetUnused<'a>,
}

/// A caller queued on a key's mutex.
struct Waiter<'a> {
    acquire: Pin<Box<dyn Future<Output = OwnedMutexGuard<()>> + Send>>,
    _forget: ForgetUnused<'a>,
}

/// Removes a key's entry on drop once no holder or waiter references it.
struct ForgetUnused<'a> {
    locks: &'a KeyLocks,
    key: String,
}

impl Drop for ForgetUnused<'_> {
    fn drop(&mut self) {
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        // Clone under the shard lock so the release path can trust the strong count
        let mutex = self.locks.entry(key.to_string()).or_default().clone();

        let mut waiter = Waiter {
            acquire: Box::pin(mutex.lock_owned()),
            _forget: self.forget_unused(key),
        };
        let guard = waiter.acquire.as_mut().await;

        KeyGuard {
            _guard: guard,
            _forget: self.forget_unused(key),
        }
    }

    /// Number of keys with a holder or waiter.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn forget_unused(&self, key: &str) -> ForgetUnused<'_> {
        ForgetUnused {
            locks: self,
            key: key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_is_released_and_forgotten() {
        let locks = KeyLocks::new();

        {
            let _guard = locks.lock("a").await;
            assert_eq!(locks.len(), 1);
        }

        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_same_key_waits() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock("a").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("a").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_wait() {
        let locks = KeyLocks::new();

        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b"))
            .await
            .unwrap();

        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_forgotten() {
        let locks = KeyLocks::new();
        let guard = locks.lock("a").await;

        let mut waiter = Box::pin(locks.lock("a"));
        assert!(futures::poll!(&mut waiter).is_pending());

        // Released while the waiter is still queued
        drop(guard);
        assert_eq!(locks.len(), 1);

        drop(waiter);
        assert!(locks.is_empty());
    }
}
