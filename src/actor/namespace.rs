//! Routing of keys to their durable counters.
//!
//! Every key is served by at most one live counter task. Requests reach the
//! task through an unbounded queue and get their answer back on a oneshot
//! channel, so callers for the same key are served strictly one after the
//! other while different keys proceed in parallel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{LimiterError, Result};
use crate::ratelimit::{SharedClock, SystemClock};

use super::counter::DurableCounter;
use super::protocol::ActorResponse;
use super::storage::SharedStorage;

/// How many times a request is re-routed after finding a dead counter task.
const MAX_DISPATCH_ATTEMPTS: usize = 3;

/// Configuration for a namespace.
#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    /// How long a counter may sit without requests before it hibernates.
    pub idle_timeout: Duration,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// A request waiting in a counter's queue.
struct Envelope {
    path: String,
    response_tx: oneshot::Sender<ActorResponse>,
}

/// The namespace's handle on a live counter task.
struct CounterHandle {
    /// Distinguishes successive tasks for the same key.
    id: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

struct Shared {
    counters: DashMap<String, CounterHandle>,
    storage: SharedStorage,
    clock: SharedClock,
    config: NamespaceConfig,
    next_id: AtomicU64,
}

/// The set of durable counters sharing one storage.
///
/// Requests are enqueued while holding the map shard that owns the key, and a
/// counter only deregisters itself under that same lock once its queue is
/// empty. A request therefore always lands in the queue of the one live
/// counter for its key, and a replacement counter is only spawned after the
/// previous one has stopped touching storage.
#[derive(Clone)]
pub struct ActorNamespace {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ActorNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorNamespace")
            .field("live_counters", &self.shared.counters.len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl ActorNamespace {
    /// Create a namespace with the default configuration and the system clock.
    pub fn new(storage: SharedStorage) -> Self {
        Self::with_config(storage, NamespaceConfig::default(), Arc::new(SystemClock))
    }

    /// Create a namespace with explicit configuration and clock.
    pub fn with_config(storage: SharedStorage, config: NamespaceConfig, clock: SharedClock) -> Self {
        Self {
            shared: Arc::new(Shared {
                counters: DashMap::new(),
                storage,
                clock,
                config,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Send a request path to the counter for `key` and wait for its response.
    ///
    /// The counter is spawned if none is live. Fails with `StoreUnavailable`
    /// only when the counter task dies before answering.
    pub async fn fetch(&self, key: &str, path: &str) -> Result<ActorResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        let mut envelope = Envelope {
            path: path.to_string(),
            response_tx,
        };

        let mut attempts = 0;
        loop {
            match self.dispatch(key, envelope) {
                Ok(()) => break,
                Err(returned) => {
                    attempts += 1;
                    if attempts >= MAX_DISPATCH_ATTEMPTS {
                        return Err(LimiterError::unavailable(format!(
                            "no durable counter could be started for {}",
                            key
                        )));
                    }
                    envelope = returned;
                }
            }
        }

        response_rx.await.map_err(|_| {
            LimiterError::unavailable(format!("durable counter for {} stopped before responding", key))
        })
    }

    /// Number of counters currently live.
    pub fn live_count(&self) -> usize {
        self.shared.counters.len()
    }

    /// Whether a counter for `key` is currently live.
    pub fn is_live(&self, key: &str) -> bool {
        self.shared.counters.contains_key(key)
    }

    /// The storage shared by every counter in this namespace.
    pub fn storage(&self) -> &SharedStorage {
        &self.shared.storage
    }

    /// Enqueue `envelope` for the live counter of `key`, spawning one if needed.
    ///
    /// Hands the envelope back if the registered task is gone.
    fn dispatch(&self, key: &str, envelope: Envelope) -> std::result::Result<(), Envelope> {
        let handle = self
            .shared
            .counters
            .entry(key.to_string())
            .or_insert_with(|| spawn_counter(&self.shared, key));

        match handle.tx.send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(envelope)) => {
                let id = handle.id;
                drop(handle);

                warn!(key = %key, counter_id = id, "Durable counter task is gone, respawning");
                self.shared.counters.remove_if(key, |_, handle| handle.id == id);
                Err(envelope)
            }
        }
    }
}

fn spawn_counter(shared: &Arc<Shared>, key: &str) -> CounterHandle {
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    let counter = DurableCounter::new(key, shared.storage.clone(), shared.clock.clone());

    debug!(key = %key, counter_id = id, "Spawning durable counter");
    tokio::spawn(run_counter(
        counter,
        id,
        rx,
        Arc::downgrade(shared),
        shared.config.idle_timeout,
    ));

    CounterHandle { id, tx }
}

/// Serve a counter's queue until it retires or its namespace is dropped.
async fn run_counter(
    mut counter: DurableCounter,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    namespace: Weak<Shared>,
    idle_timeout: Duration,
) {
    loop {
        tokio::select! {
            envelope = rx.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };
                let response = counter.fetch(&envelope.path).await;
                // The caller may have given up waiting
                let _ = envelope.response_tx.send(response);
            }
            _ = tokio::time::sleep(idle_timeout) => {
                if let Err(e) = counter.hibernate().await {
                    warn!(key = %counter.key(), error = %e, "Failed to prune hibernating counter");
                }

                let Some(namespace) = namespace.upgrade() else {
                    break;
                };
                let retired = namespace
                    .counters
                    .remove_if(counter.key(), |_, handle| handle.id == id && rx.is_empty())
                    .is_some();

                if retired {
                    debug!(key = %counter.key(), counter_id = id, "Durable counter retired");
                    break;
                }
            }
        }
    }
}
