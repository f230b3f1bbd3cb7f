//! The limiter facade.

use std::sync::Arc;

use tracing::trace;

use crate::config::BiteConfig;
use crate::error::{LimiterError, Result};

use super::key::RateLimiterKey;
use super::store::Store;

/// Default window length in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 1000;
/// Subject id used when the caller does not name one.
pub const GLOBAL_ID: &str = "global";

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is within the limit
    pub ok: bool,
    /// Requests still admissible in the current window
    pub remaining: u64,
}

impl Decision {
    /// Derive the decision for a windowed `count` against `limit`.
    pub fn from_count(count: u64, limit: u64) -> Self {
        Self {
            ok: count <= limit,
            remaining: limit.saturating_sub(count),
        }
    }
}

/// Admits or denies requests by counting them in a sliding window.
///
/// The limiter keeps no state of its own: every check records one event in
/// the store and derives the decision from the count it returns. Store errors
/// are returned to the caller untouched; whether a failed check admits or
/// denies is the caller's policy.
pub struct Limiter {
    limit: u64,
    window_ms: u64,
    prefix: Option<String>,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("limit", &self.limit)
            .field("window_ms", &self.window_ms)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Limiter {
    /// Create a limiter with the default window and no prefix.
    pub fn new(limit: u64, store: Arc<dyn Store>) -> Result<Self> {
        Self::builder().limit(limit).store(store).build()
    }

    /// Start building a limiter.
    pub fn builder() -> LimiterBuilder {
        LimiterBuilder::default()
    }

    /// Build the configured store and a limiter on top of it.
    pub fn from_config(config: &BiteConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .limit(config.limiter.limit)
            .window_ms(config.limiter.window_ms)
            .store(config.store.build()?);

        if let Some(prefix) = &config.limiter.prefix {
            builder = builder.prefix(prefix.clone());
        }

        builder.build()
    }

    /// Count a request for `id` and decide whether it is admitted.
    pub async fn check(&self, id: &str) -> Result<Decision> {
        let key = self.key_for(id);
        let count = self.store.increment(key.as_str(), self.window_ms).await?;
        let decision = Decision::from_count(count, self.limit);

        trace!(
            key = %key,
            count = count,
            ok = decision.ok,
            remaining = decision.remaining,
            "Checked rate limit"
        );

        Ok(decision)
    }

    /// Count a request against the shared `"global"` subject.
    pub async fn check_global(&self) -> Result<Decision> {
        self.check(GLOBAL_ID).await
    }

    /// Forget every event recorded for `id`.
    pub async fn reset(&self, id: &str) -> Result<()> {
        let key = self.key_for(id);
        self.store.reset(key.as_str()).await
    }

    /// Forget every event recorded for the `"global"` subject.
    pub async fn reset_global(&self) -> Result<()> {
        self.reset(GLOBAL_ID).await
    }

    /// The storage key used for `id`.
    pub fn key_for(&self, id: &str) -> RateLimiterKey {
        RateLimiterKey::compose(self.prefix.as_deref(), id)
    }

    /// Maximum admitted events per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Key prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }
}

/// Builder for [`Limiter`].
#[derive(Default)]
pub struct LimiterBuilder {
    limit: Option<u64>,
    window_ms: Option<u64>,
    prefix: Option<String>,
    store: Option<Arc<dyn Store>>,
}

impl LimiterBuilder {
    /// Maximum admitted events per window. Must be greater than zero.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Window length in milliseconds (default 1000).
    pub fn window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = Some(window_ms);
        self
    }

    /// Namespace keys as `prefix:id`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// The backing store.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the options and build the limiter.
    pub fn build(self) -> Result<Limiter> {
        let limit = match self.limit {
            Some(limit) if limit > 0 => limit,
            Some(_) => {
                return Err(LimiterError::InvalidConfiguration(
                    "limit must be greater than zero".to_string(),
                ))
            }
            None => {
                return Err(LimiterError::InvalidConfiguration(
                    "limit is required".to_string(),
                ))
            }
        };

        let store = self.store.ok_or_else(|| {
            LimiterError::InvalidConfiguration("a store is required".to_string())
        })?;

        Ok(Limiter {
            limit,
            window_ms: self.window_ms.unwrap_or(DEFAULT_WINDOW_MS),
            prefix: self.prefix,
            store,
        })
    }
}
