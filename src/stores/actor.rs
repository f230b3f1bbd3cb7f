//! Store backed by per-key durable counters.

use async_trait::async_trait;
use tracing::{trace, warn};

use crate::actor::{ActorNamespace, ActorRequest};
use crate::error::{LimiterError, Result};
use crate::ratelimit::Store;

/// A [`Store`] that forwards each key to its own durable counter.
///
/// Requests and responses cross the counter boundary in their wire form, so
/// any non-2xx answer is reported as `StoreUnavailable`.
#[derive(Debug, Clone)]
pub struct ActorStore {
    namespace: ActorNamespace,
}

impl ActorStore {
    pub fn new(namespace: ActorNamespace) -> Self {
        Self { namespace }
    }

    /// The namespace hosting the counters.
    pub fn namespace(&self) -> &ActorNamespace {
        &self.namespace
    }

    async fn call(&self, key: &str, request: ActorRequest) -> Result<String> {
        let response = self.namespace.fetch(key, &request.path()).await?;

        if !response.is_success() {
            warn!(
                key = %key,
                status = response.status,
                body = %response.body,
                "Durable counter returned an error"
            );
            return Err(LimiterError::unavailable(format!(
                "Error from durable counter: {} {}",
                response.status, response.body
            )));
        }

        Ok(response.body)
    }
}

#[async_trait]
impl Store for ActorStore {
    async fn increment(&self, key: &str, window_ms: u64) -> Result<u64> {
        let body = self.call(key, ActorRequest::Increment { window_ms }).await?;
        let count = body.trim().parse::<u64>().map_err(|e| {
            LimiterError::unavailable(format!("invalid count {:?} from durable counter: {}", body, e))
        })?;

        trace!(key = %key, window_ms = window_ms, count = count, "Actor store increment");
        Ok(count)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.call(key, ActorRequest::Reset).await?;
        trace!(key = %key, "Actor store reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{DurableStorage, MemoryStorage, NamespaceConfig, SharedStorage};
    use crate::ratelimit::{ManualClock, WindowLog};
    use std::sync::Arc;

    /// Storage that refuses every operation.
    struct BrokenStorage;

    #[async_trait]
    impl DurableStorage for BrokenStorage {
        async fn get(&self, _key: &str) -> Result<Option<WindowLog>> {
            Err(LimiterError::unavailable("storage offline"))
        }

        async fn put(&self, _key: &str, _log: &WindowLog) -> Result<()> {
            Err(LimiterError::unavailable("storage offline"))
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(LimiterError::unavailable("storage offline"))
        }
    }

    fn store_with(storage: SharedStorage, clock: Arc<ManualClock>) -> ActorStore {
        ActorStore::new(ActorNamespace::with_config(
            storage,
            NamespaceConfig::default(),
            clock,
        ))
    }

    #[tokio::test]
    async fn test_increment_and_reset() {
        let clock = Arc::new(ManualClock::new(50_000));
        let store = store_with(Arc::new(MemoryStorage::new()), clock.clone());

        assert_eq!(store.increment("k", 1_000).await.unwrap(), 1);
        assert_eq!(store.increment("k", 1_000).await.unwrap(), 2);

        clock.advance(1_001);
        assert_eq!(store.increment("k", 1_000).await.unwrap(), 1);

        store.reset("k").await.unwrap();
        store.reset("k").await.unwrap();
        assert_eq!(store.increment("k", 1_000).await.unwrap(), 1);
        assert!(store.namespace().is_live("k"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_unavailable() {
        let clock = Arc::new(ManualClock::new(50_000));
        let store = store_with(Arc::new(BrokenStorage), clock);

        let err = store.increment("k", 1_000).await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(err.to_string().contains("500"));

        let err = store.reset("k").await.unwrap_err();
        assert!(err.is_store_unavailable());
    }
}
