//! Configuration management for the limiter.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actor::{ActorNamespace, FileStorage, MemoryStorage, NamespaceConfig, SharedStorage};
use crate::error::{LimiterError, Result};
use crate::ratelimit::{Store, SystemClock, DEFAULT_WINDOW_MS};
use crate::stores::{ActorStore, DatabaseStore, MemorySortedSet, MemoryTable, RestSortedSet, SortedSetStore};

/// Top-level configuration: the limiter and the store it counts in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiteConfig {
    /// Limiter configuration
    pub limiter: LimiterConfig,

    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Limiter options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum admitted events per window
    pub limit: u64,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Optional key namespace
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

/// Which store backs the limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// One durable counter per key
    Actor {
        #[serde(default)]
        storage: StorageConfig,
        /// Idle time before a counter hibernates, in milliseconds
        #[serde(default = "default_idle_timeout_ms")]
        idle_timeout_ms: u64,
    },
    /// A sorted collection per key
    SortedSet {
        #[serde(default)]
        backend: SortedSetConfig,
    },
    /// A table of `(key, timestamp)` rows
    Relational,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Actor {
            storage: StorageConfig::default(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

/// Where durable counters keep their lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    Memory,
    File {
        dir: PathBuf,
    },
}

/// Which medium holds the sorted collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SortedSetConfig {
    #[default]
    Memory,
    Rest {
        url: String,
        token: String,
    },
}

impl BiteConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::Config(format!("Failed to parse limiter config: {}", e)))
    }
}

impl StoreConfig {
    /// Build the configured store.
    pub fn build(&self) -> Result<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match self {
            StoreConfig::Actor {
                storage,
                idle_timeout_ms,
            } => {
                let config = NamespaceConfig {
                    idle_timeout: Duration::from_millis(*idle_timeout_ms),
                };
                let namespace = ActorNamespace::with_config(storage.build()?, config, Arc::new(SystemClock));
                Arc::new(ActorStore::new(namespace))
            }
            StoreConfig::SortedSet {
                backend: SortedSetConfig::Memory,
            } => Arc::new(SortedSetStore::new(MemorySortedSet::new())),
            StoreConfig::SortedSet {
                backend: SortedSetConfig::Rest { url, token },
            } => Arc::new(SortedSetStore::new(RestSortedSet::new(url.as_str(), token.as_str()))),
            StoreConfig::Relational => Arc::new(DatabaseStore::new(MemoryTable::new())),
        };

        Ok(store)
    }
}

impl StorageConfig {
    /// Build the configured counter storage.
    pub fn build(&self) -> Result<SharedStorage> {
        match self {
            StorageConfig::Memory => Ok(Arc::new(MemoryStorage::new())),
            StorageConfig::File { dir } => Ok(Arc::new(FileStorage::new(dir)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
limiter:
  limit: 10
"#;
        let config = BiteConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.limit, 10);
        assert_eq!(config.limiter.window_ms, 1000);
        assert_eq!(config.limiter.prefix, None);
        assert!(matches!(
            config.store,
            StoreConfig::Actor {
                storage: StorageConfig::Memory,
                idle_timeout_ms: 30_000
            }
        ));
    }

    #[test]
    fn test_parse_file_backed_actor_store() {
        let yaml = r#"
limiter:
  limit: 100
  window_ms: 60000
  prefix: api
store:
  kind: actor
  idle_timeout_ms: 5000
  storage:
    kind: file
    dir: /var/lib/bite
"#;
        let config = BiteConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.prefix.as_deref(), Some("api"));
        match config.store {
            StoreConfig::Actor {
                storage: StorageConfig::File { dir },
                idle_timeout_ms,
            } => {
                assert_eq!(dir, PathBuf::from("/var/lib/bite"));
                assert_eq!(idle_timeout_ms, 5000);
            }
            other => panic!("unexpected store config: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rest_sorted_set() {
        let yaml = r#"
limiter:
  limit: 5
store:
  kind: sorted_set
  backend:
    kind: rest
    url: https://example.upstash.io
    token: secret
"#;
        let config = BiteConfig::from_yaml(yaml).unwrap();
        match config.store {
            StoreConfig::SortedSet {
                backend: SortedSetConfig::Rest { url, token },
            } => {
                assert_eq!(url, "https://example.upstash.io");
                assert_eq!(token, "secret");
            }
            other => panic!("unexpected store config: {:?}", other),
        }
    }

    #[test]
    fn test_parse_relational() {
        let yaml = r#"
limiter:
  limit: 5
store:
  kind: relational
"#;
        let config = BiteConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.store, StoreConfig::Relational));
        assert!(config.store.build().is_ok());
    }

    #[test]
    fn test_parse_error() {
        let err = BiteConfig::from_yaml("limiter: [").unwrap_err();
        assert!(matches!(err, LimiterError::Config(_)));

        let err = BiteConfig::from_yaml("store:\n  kind: relational\n").unwrap_err();
        assert!(matches!(err, LimiterError::Config(_)));
    }

    #[test]
    fn test_unknown_store_kind() {
        let yaml = r#"
limiter:
  limit: 5
store:
  kind: carrier_pigeon
"#;
        assert!(BiteConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.yaml");
        std::fs::write(&path, "limiter:\n  limit: 3\n  prefix: svc\n").unwrap();

        let config = BiteConfig::from_file(&path).unwrap();
        assert_eq!(config.limiter.limit, 3);

        let err = BiteConfig::from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, LimiterError::Io(_)));
    }

    #[test]
    fn test_file_storage_build_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig::File {
            dir: dir.path().join("counters"),
        };

        storage.build().unwrap();
        assert!(dir.path().join("counters").is_dir());
    }
}
